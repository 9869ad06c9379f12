//! Metrics collection and monitoring for the Tandem session host
//!
//! Prometheus counters and gauges registered once in a crate-wide registry.

use crate::core::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge, Registry,
};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Transaction sequencing counters
pub struct TransactionMetrics {
    /// Total number of client transactions accepted
    pub accepted: IntCounter,
    /// Total number of client transactions denied
    pub denied: IntCounter,
}

/// Session and port metrics
pub struct SessionMetrics {
    /// Number of open sessions
    pub open: IntGauge,
    /// Number of connected ports
    pub ports: IntGauge,
    /// Total number of snapshots sent to replicas
    pub snapshots_sent: IntCounter,
    /// Total number of signals relayed between replicas
    pub signals_relayed: IntCounter,
}

/// Network metrics for monitoring data transfer
pub struct NetworkMetrics {
    /// Total bytes received from replicas
    pub bytes_received: IntCounter,
    /// Total messages rejected before decoding
    pub messages_rejected: IntCounter,
}

/// Centralized metrics collection for all host components
pub struct Metrics {
    /// Transaction counters
    pub transactions: TransactionMetrics,
    /// Session and port gauges
    pub sessions: SessionMetrics,
    /// Network counters
    pub network: NetworkMetrics,
}

impl Metrics {
    /// Create new metrics instance registered with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            transactions: TransactionMetrics::new(registry)?,
            sessions: SessionMetrics::new(registry)?,
            network: NetworkMetrics::new(registry)?,
        })
    }

    /// Get the global metrics instance, if registration succeeded
    pub fn global() -> Option<&'static Metrics> {
        static INSTANCE: Lazy<Option<Metrics>> = Lazy::new(|| Metrics::new(&REGISTRY).ok());
        INSTANCE.as_ref()
    }
}

impl TransactionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            accepted: register_int_counter_with_registry!(
                "td_transactions_accepted_total",
                "Total number of client transactions accepted",
                registry
            )?,
            denied: register_int_counter_with_registry!(
                "td_transactions_denied_total",
                "Total number of client transactions denied",
                registry
            )?,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            open: register_int_gauge_with_registry!("td_sessions_open", "Number of open sessions", registry)?,
            ports: register_int_gauge_with_registry!("td_ports_connected", "Number of connected ports", registry)?,
            snapshots_sent: register_int_counter_with_registry!(
                "td_snapshots_sent_total",
                "Total number of snapshots sent",
                registry
            )?,
            signals_relayed: register_int_counter_with_registry!(
                "td_signals_relayed_total",
                "Total number of signals relayed",
                registry
            )?,
        })
    }
}

impl NetworkMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            bytes_received: register_int_counter_with_registry!(
                "td_network_bytes_received_total",
                "Total bytes received from replicas",
                registry
            )?,
            messages_rejected: register_int_counter_with_registry!(
                "td_messages_rejected_total",
                "Total messages rejected before decoding",
                registry
            )?,
        })
    }
}

/// Run `update` against the global metrics when they are available
pub fn record(update: impl FnOnce(&Metrics)) {
    if let Some(metrics) = Metrics::global() {
        update(metrics);
    }
}

/// Initialize the metrics registry by creating the global metrics instance
///
/// This function should be called once during application startup to ensure
/// all metrics are properly registered with Prometheus.
pub fn init_registry() {
    if Metrics::global().is_none() {
        tracing::warn!("Metrics registration failed, metrics are disabled");
    }
}

/// Get the Prometheus registry for serving metrics to monitoring systems
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect and return all metrics as a Prometheus-formatted string
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
