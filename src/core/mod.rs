//! Core host foundations
//!
//! Error handling and configuration shared by every host module.

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{load_config_or_default, Config, LogFormat};
pub use error::{Error, Result, StorageError};
