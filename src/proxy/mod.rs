//! Proxy orchestration: provider loading, socket lifecycle and listener
//! supervision.

mod server;
mod shutdown;
mod socket;

pub use server::{Proxy, ProxyError};
pub use shutdown::{ShutdownHooks, SocketPath};
pub use socket::{AsyncStream, BindError, BindTarget, BoundSocket, Connection, SocketManager};
