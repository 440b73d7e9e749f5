//! Prometheus metrics.
//!
//! Key metrics:
//! - meridian_tso_allocations_total: Counter of timestamps handed out, per stream
//! - meridian_tso_allocate_latency_seconds: Histogram of allocation latency
//! - meridian_tso_events_total: Counter of engine events (saves, bumps, errors)
//! - meridian_leader: Gauge, 1 while this member holds leadership

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    /// Number of timestamps allocated (sum of batch counts).
    pub allocations_total: IntCounterVec,
    pub allocate_latency: HistogramVec,
    /// Engine events keyed by stream and event name.
    pub events_total: IntCounterVec,
    pub leader: IntGauge,
}

impl Metrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let allocations_total = IntCounterVec::new(
            Opts::new(
                "meridian_tso_allocations_total",
                "Total number of timestamps allocated",
            ),
            &["stream"],
        )?;
        let allocate_latency = HistogramVec::new(
            HistogramOpts::new(
                "meridian_tso_allocate_latency_seconds",
                "Allocation latency from request to reply",
            )
            .buckets(vec![
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
            &["stream"],
        )?;
        let events_total = IntCounterVec::new(
            Opts::new("meridian_tso_events_total", "Allocator engine events"),
            &["stream", "event"],
        )?;
        let leader = IntGauge::new("meridian_leader", "1 if this member is the leader")?;

        registry.register(Box::new(allocations_total.clone()))?;
        registry.register(Box::new(allocate_latency.clone()))?;
        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            registry,
            allocations_total,
            allocate_latency,
            events_total,
            leader,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Initialize the metrics system.
///
/// Subsequent calls return the existing instance.
pub fn init_metrics() -> Result<&'static Metrics, prometheus::Error> {
    if let Some(metrics) = METRICS.get() {
        return Ok(metrics);
    }
    let metrics = Metrics::new()?;
    Ok(METRICS.get_or_init(|| metrics))
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record a served allocation of `count` timestamps.
pub fn record_allocation(stream: &str, count: u32, latency: Duration) {
    if let Some(m) = METRICS.get() {
        m.allocations_total
            .with_label_values(&[stream])
            .inc_by(u64::from(count));
        m.allocate_latency
            .with_label_values(&[stream])
            .observe(latency.as_secs_f64());
    }
}

/// Record an engine event such as `save`, `logical_exhausted` or `clock_anomaly`.
pub fn record_event(stream: &str, event: &str) {
    if let Some(m) = METRICS.get() {
        m.events_total.with_label_values(&[stream, event]).inc();
    }
}

pub fn record_leader(leader: bool) {
    if let Some(m) = METRICS.get() {
        m.leader.set(i64::from(leader));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics().unwrap() as *const Metrics;
        let second = init_metrics().unwrap() as *const Metrics;
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_allocation_counts_batch() {
        let m = init_metrics().unwrap();
        let before = m.allocations_total.with_label_values(&["test/batch"]).get();
        record_allocation("test/batch", 16, Duration::from_micros(40));
        let after = m.allocations_total.with_label_values(&["test/batch"]).get();
        assert_eq!(after - before, 16);
    }

    #[test]
    fn test_record_event_and_leader() {
        let m = init_metrics().unwrap();
        record_event("test/events", "save");
        assert!(m.events_total.with_label_values(&["test/events", "save"]).get() >= 1);
        // Should not panic
        record_leader(true);
        record_leader(false);
    }
}
