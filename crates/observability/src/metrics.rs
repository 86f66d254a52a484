//! Pipeline counters exposed in the Prometheus text format.
//!
//! Each [`Metrics`] owns its registry, so tests and embedded servers never
//! collide on metric names.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

pub const PROCESSING_FAILED: &str = "reporting_service_processing_failed";
pub const JOBS_SUCCEEDED: &str = "reporting_service_jobs_succeeded";
pub const JOBS_REJECTED: &str = "reporting_service_jobs_rejected";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
    #[error("metrics exposition is not utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Registry plus the counters the job processor and HTTP layer update.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    processing_failed: IntCounter,
    jobs_succeeded: IntCounter,
    jobs_rejected: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("processing_failed", &self.processing_failed.get())
            .field("jobs_succeeded", &self.jobs_succeeded.get())
            .field("jobs_rejected", &self.jobs_rejected.get())
            .finish()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let processing_failed = counter(
            &registry,
            PROCESSING_FAILED,
            "The total number of job processor failures",
        )?;
        let jobs_succeeded = counter(
            &registry,
            JOBS_SUCCEEDED,
            "The total number of report jobs finished successfully",
        )?;
        let jobs_rejected = counter(
            &registry,
            JOBS_REJECTED,
            "The total number of report jobs rejected because the processor was busy",
        )?;

        Ok(Self {
            registry,
            processing_failed,
            jobs_succeeded,
            jobs_rejected,
        })
    }

    pub fn processing_failed(&self) -> &IntCounter {
        &self.processing_failed
    }

    pub fn jobs_succeeded(&self) -> &IntCounter {
        &self.jobs_succeeded
    }

    pub fn jobs_rejected(&self) -> &IntCounter {
        &self.jobs_rejected
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_failure_counter() {
        let metrics = Metrics::new().unwrap();
        metrics.processing_failed().inc();
        metrics.processing_failed().inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("# HELP reporting_service_processing_failed The total number of job processor failures"));
        assert!(text.contains("reporting_service_processing_failed 2"));
    }

    #[test]
    fn registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.jobs_rejected().inc();
        assert_eq!(a.jobs_rejected().get(), 1);
        assert_eq!(b.jobs_rejected().get(), 0);
    }
}
