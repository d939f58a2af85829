//! Prometheus metrics for Nano-Mesh modules.
//!
//! All metrics follow the naming convention: `mesh_<component>_<metric>_<unit>`
//!
//! Collectors are process-wide statics. They count even before
//! [`register_metrics`] runs; registration only makes them visible to
//! [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REQUESTER METRICS
    // =========================================================================

    /// Outbound calls published, by target routing key
    pub static ref CALLS_SENT: CounterVec = CounterVec::new(
        Opts::new("mesh_rpc_calls_sent_total", "Outbound calls published"),
        &["routing_key"]
    ).expect("metric creation failed");

    /// Outbound calls that ended without a reply
    pub static ref CALL_FAILURES: CounterVec = CounterVec::new(
        Opts::new("mesh_rpc_call_failures_total", "Outbound calls that failed"),
        &["reason"]  // reason: publish/connection_lost/deadline/content_type
    ).expect("metric creation failed");

    /// Replies matched to a waiting call
    pub static ref REPLIES_RECEIVED: Counter = Counter::new(
        "mesh_rpc_replies_received_total",
        "Replies delivered to a waiting caller"
    ).expect("metric creation failed");

    /// Replies nobody was waiting for
    pub static ref ORPHAN_REPLIES: Counter = Counter::new(
        "mesh_rpc_orphan_replies_total",
        "Replies dropped because no call was pending"
    ).expect("metric creation failed");

    /// Calls currently awaiting a reply
    pub static ref PENDING_CALLS: Gauge = Gauge::new(
        "mesh_rpc_pending_calls",
        "Calls currently awaiting a reply"
    ).expect("metric creation failed");

    /// Round-trip time of a call
    pub static ref CALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "mesh_rpc_call_duration_seconds",
            "Time from publish to reply"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // LISTENER METRICS
    // =========================================================================

    /// Inbound requests dispatched, by module and reply status
    pub static ref DISPATCHES: CounterVec = CounterVec::new(
        Opts::new("mesh_dispatch_total", "Inbound requests dispatched"),
        &["module", "status"]
    ).expect("metric creation failed");

    /// Connection attempts made by supervisors
    pub static ref RECONNECT_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("mesh_connect_attempts_total", "Broker connection attempts"),
        &["module", "outcome"]  // outcome: success/failed
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; metrics already registered are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Requester
        Box::new(CALLS_SENT.clone()),
        Box::new(CALL_FAILURES.clone()),
        Box::new(REPLIES_RECEIVED.clone()),
        Box::new(ORPHAN_REPLIES.clone()),
        Box::new(PENDING_CALLS.clone()),
        Box::new(CALL_DURATION.clone()),
        // Listener
        Box::new(DISPATCHES.clone()),
        Box::new(RECONNECT_ATTEMPTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
