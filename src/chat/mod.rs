pub mod codec;
pub mod command;
pub mod config;
pub mod log;
pub mod registry;
pub mod router;
pub mod server;
