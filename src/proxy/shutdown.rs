//! Termination-signal handling for local-domain sockets.
//!
//! Every local-domain listener registers its socket path and cancellation
//! token here. The first SIGINT or SIGTERM cancels every registered accept
//! loop, unlinks every registered path and exits the process with status 0.
//! Later signals are ignored. SIGKILL cannot be trapped; a killed process
//! leaves its socket files behind.
//!
//! Network listeners never register, so a proxy with only TCP listeners
//! keeps the default signal dispositions.

use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A local-domain socket's filesystem entry, removed at most once.
#[derive(Debug)]
pub struct SocketPath {
    path: PathBuf,
    removed: AtomicBool,
}

impl SocketPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the socket file. Returns `Ok(false)` if it was already removed
    /// through this handle.
    pub fn remove(&self) -> io::Result<bool> {
        if self.removed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

struct Registration {
    listener: String,
    path: Arc<SocketPath>,
    shutdown: CancellationToken,
}

type ExitFn = Box<dyn Fn(i32) + Send + Sync>;

/// Process-wide set of shutdown hooks.
pub struct ShutdownHooks {
    registrations: Mutex<Vec<Registration>>,
    fired: AtomicBool,
    install_signals: bool,
    signals_installed: AtomicBool,
    exit: ExitFn,
}

impl ShutdownHooks {
    /// Hooks that fire on SIGINT/SIGTERM and then exit the process.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registrations: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
            install_signals: true,
            signals_installed: AtomicBool::new(false),
            exit: Box::new(|code| std::process::exit(code)),
        })
    }

    /// Hooks that only fire through [`ShutdownHooks::fire`] and hand the exit
    /// status to `exit` instead of terminating the process.
    pub fn manual(exit: impl Fn(i32) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            registrations: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
            install_signals: false,
            signals_installed: AtomicBool::new(false),
            exit: Box::new(exit),
        })
    }

    /// Take ownership of a local-domain socket's teardown.
    ///
    /// The first registration installs the signal handlers. Must be called
    /// from within a Tokio runtime.
    pub fn register(
        self: &Arc<Self>,
        listener: &str,
        path: Arc<SocketPath>,
        shutdown: CancellationToken,
    ) -> io::Result<()> {
        self.registrations.lock().push(Registration {
            listener: listener.to_string(),
            path,
            shutdown,
        });

        if self.install_signals && !self.signals_installed.swap(true, Ordering::AcqRel) {
            self.listen_for_signals()?;
        }
        Ok(())
    }

    /// Run the shutdown: close every registered socket, unlink its path and
    /// exit with status 0. Returns `false` without doing anything if a
    /// shutdown already ran.
    pub fn fire(&self, signal: &str) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        info!("Caught signal {}: shutting down.", signal);

        let registrations = std::mem::take(&mut *self.registrations.lock());
        for registration in registrations {
            registration.shutdown.cancel();
            match registration.path.remove() {
                Ok(true) => debug!(
                    "Removed socket {} for listener '{}'",
                    registration.path.path().display(),
                    registration.listener
                ),
                Ok(false) => {}
                Err(e) => warn!(
                    "Unable to remove socket {} for listener '{}': {}",
                    registration.path.path().display(),
                    registration.listener,
                    e
                ),
            }
        }

        (self.exit)(0);
        true
    }

    /// Register the OS handlers now, so no signal is missed between bind and
    /// the watcher task's first poll.
    fn listen_for_signals(self: &Arc<Self>) -> io::Result<()> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let hooks = Arc::clone(self);
        tokio::spawn(async move {
            let name = tokio::select! {
                received = interrupt.recv() => received.map(|_| "interrupt"),
                received = terminate.recv() => received.map(|_| "terminated"),
            };
            match name {
                Some(name) => {
                    hooks.fire(name);
                }
                None => error!("Signal stream closed; local sockets will not be cleaned up"),
            }
        });
        Ok(())
    }
}
