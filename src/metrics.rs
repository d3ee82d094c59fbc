//! Migration and lock metrics, plus tracing span helpers
//!
//! Counters and histograms are registered on the global OpenTelemetry meter.
//! Without an installed meter provider they are no-ops, so embedders choose
//! the exporter.

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
#[cfg(feature = "metrics")]
use std::time::Duration;

#[cfg(feature = "metrics")]
pub static METRICS: Lazy<TidemarkMetrics> = Lazy::new(TidemarkMetrics::init);

#[cfg(feature = "metrics")]
pub struct TidemarkMetrics {
    pub migrations_applied_total: Counter<u64>,
    pub migrations_skipped_total: Counter<u64>,
    pub lock_attempts_total: Counter<u64>,
    pub migration_duration: Histogram<f64>,
    pub lock_wait_duration: Histogram<f64>,
}

#[cfg(feature = "metrics")]
impl TidemarkMetrics {
    pub fn init() -> Self {
        let meter = global::meter("tidemark");

        let migrations_applied_total = meter
            .u64_counter("tidemark_migrations_applied_total")
            .with_description("Migrations applied and recorded")
            .build();

        let migrations_skipped_total = meter
            .u64_counter("tidemark_migrations_skipped_total")
            .with_description("Migrations found already applied after taking the lock")
            .build();

        let lock_attempts_total = meter
            .u64_counter("tidemark_lock_attempts_total")
            .with_description("Attempts to create the remote lock document")
            .build();

        let migration_duration = meter
            .f64_histogram("tidemark_migration_duration_seconds")
            .with_description("Time spent executing the requests of one migration")
            .build();

        let lock_wait_duration = meter
            .f64_histogram("tidemark_lock_wait_seconds")
            .with_description("Time spent waiting for the migration lock")
            .build();

        Self {
            migrations_applied_total,
            migrations_skipped_total,
            lock_attempts_total,
            migration_duration,
            lock_wait_duration,
        }
    }

    pub fn record_applied(&self, elapsed: Duration) {
        self.migrations_applied_total.add(1, &[]);
        self.migration_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_skipped(&self) {
        self.migrations_skipped_total.add(1, &[]);
    }

    pub fn record_lock_attempt(&self) {
        self.lock_attempts_total.add(1, &[]);
    }

    pub fn observe_lock_wait(&self, waited: Duration) {
        self.lock_wait_duration.record(waited.as_secs_f64(), &[]);
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span covering acquisition of the lock for a migration key
    pub fn acquire_lock_span(lock_id: &str) -> Span {
        info_span!("tidemark.lock.acquire", lock_id = %lock_id)
    }

    /// Span covering one migration, from lock acquisition to release
    pub fn execute_migration_span(filename: &str) -> Span {
        info_span!("tidemark.migration.execute", filename = %filename)
    }

    pub fn run_span(migration_key: &str) -> Span {
        info_span!("tidemark.migration.run", migration_key = %migration_key)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_provider_is_noop() {
        METRICS.record_lock_attempt();
        METRICS.observe_lock_wait(Duration::from_millis(5));
        METRICS.record_applied(Duration::from_millis(12));
        METRICS.record_skipped();
    }
}
