pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod frontend;
pub mod judge;
pub mod packet;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod shutdown;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use scheduler::{Dispatcher, Submission};
pub use server::BridgeServer;
