//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Prometheus counters for the job pipeline.
pub mod metrics;

pub use metrics::{Metrics, MetricsError};
