pub mod cli;
pub mod config;
pub mod listeners;
pub mod logging;
pub mod proxy;
pub mod secrets;
pub mod summon;
