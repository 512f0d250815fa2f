pub mod commands;
pub mod config;
pub mod contacts;
pub mod dispatcher;
pub mod error;
pub mod files;
pub mod obfuscation;
pub mod resolver;
pub mod status;
pub mod telegram_log;
pub mod transport;
pub mod updates;
pub mod utils;

pub use error::{Error, Result};
