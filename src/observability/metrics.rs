use crate::error::{AppError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics emitted by the idempotency store.
///
/// Without an installed recorder every call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_key_created(&self, with_ttl: bool) {
        counter!("idempotency_keys_created_total", "ttl" => with_ttl.to_string()).increment(1);
    }

    /// `outcome` is one of `hit`, `miss` or `expired`.
    pub fn record_key_lookup(&self, outcome: &'static str) {
        counter!("idempotency_key_lookups_total", "outcome" => outcome).increment(1);
        if outcome == "expired" {
            counter!("idempotency_keys_expired_total").increment(1);
        }
    }

    pub fn record_response_saved(&self) {
        counter!("idempotency_responses_saved_total").increment(1);
    }

    pub fn record_response_lookup(&self, hit: bool) {
        counter!("idempotency_response_lookups_total", "hit" => hit.to_string()).increment(1);
    }

    pub fn record_import(&self, records: u64) {
        counter!("idempotency_records_imported_total").increment(records);
    }

    pub fn record_export(&self, records: u64) {
        histogram!("idempotency_export_record_count").record(records as f64);
    }

    pub fn record_cleanup(&self, keys_removed: u64, responses_removed: u64, duration_ms: f64) {
        counter!("idempotency_cleanup_removed_total", "kind" => "meta").increment(keys_removed);
        counter!("idempotency_cleanup_removed_total", "kind" => "response")
            .increment(responses_removed);
        histogram!("idempotency_cleanup_duration_ms").record(duration_ms);
    }

    pub fn record_storage_op(
        &self,
        operation: &'static str,
        backend: &'static str,
        duration_ms: f64,
        success: bool,
    ) {
        counter!("idempotency_storage_ops_total", "operation" => operation, "backend" => backend, "success" => success.to_string()).increment(1);
        histogram!("idempotency_storage_op_duration_ms", "operation" => operation, "backend" => backend).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder and returns its handle.
///
/// Safe to call more than once; later calls return the first handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("idempotency_keys_created_total", Unit::Count, "Idempotency keys issued");
    describe_counter!("idempotency_key_lookups_total", Unit::Count, "Key lookups by outcome");
    describe_counter!("idempotency_keys_expired_total", Unit::Count, "Keys evicted lazily on read");

    describe_counter!("idempotency_responses_saved_total", Unit::Count, "Responses cached");
    describe_counter!("idempotency_response_lookups_total", Unit::Count, "Response lookups by hit");

    describe_counter!("idempotency_records_imported_total", Unit::Count, "Records written by imports");
    describe_histogram!("idempotency_export_record_count", Unit::Count, "Records per export");

    describe_counter!("idempotency_cleanup_removed_total", Unit::Count, "Records removed by sweeps");
    describe_histogram!("idempotency_cleanup_duration_ms", Unit::Milliseconds, "Sweep latency in milliseconds");

    describe_counter!("idempotency_storage_ops_total", Unit::Count, "Store operations by outcome");
    describe_histogram!("idempotency_storage_op_duration_ms", Unit::Milliseconds, "Store operation latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
