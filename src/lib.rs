//! Tandem - Replicated Document Sessions
//!
//! Hosts many replicated documents, each ordered by its own sequencer from
//! `tandem-core`. The host routes client bytes to sessions, persists their
//! snapshots and reports what it does through `tracing` and Prometheus.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod storage;
pub mod session;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{load_config_or_default, Config, Error, LogFormat, Result, StorageError};
pub use session::{Greeting, HostCarrier, PortHandle, SessionHost};
pub use storage::{MemoryStore, SessionId, SessionStore};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing from `RUST_LOG` and the metrics registry
pub fn init() -> Result<()> {
    init_with(&Config::default())
}

/// Initialize tracing and metrics from `config`.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_with(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.logging.output_format()? {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    if config.metrics.enable_prometheus {
        system::metrics::init_registry();
    }

    Ok(())
}
