//! Metrics collection for the conversation memory subsystem

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_vec_with_registry, Counter, CounterVec,
    Gauge, HistogramVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Message store
    pub turns_appended: CounterVec,
    pub turns_evicted: Counter,
    pub ledger_total: Gauge,

    // Background enrichment
    pub compactions: CounterVec,
    pub anatomizations: CounterVec,
    pub topic_excerpts: Gauge,

    // Retrieval
    pub relevance_lookups: CounterVec,

    // Completion service
    pub completion_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let turns_appended = register_counter_vec_with_registry!(
            Opts::new("conversation_turns_appended_total", "Turns appended to the message store"),
            &["role"],
            registry
        )?;

        let turns_evicted = register_counter_with_registry!(
            Opts::new("conversation_turns_evicted_total", "Turns evicted by budget enforcement"),
            registry
        )?;

        let ledger_total = register_gauge_with_registry!(
            Opts::new("conversation_ledger_tokens", "Token total of live turns"),
            registry
        )?;

        let compactions = register_counter_vec_with_registry!(
            Opts::new("conversation_compactions_total", "Compaction attempts by outcome"),
            &["outcome"],
            registry
        )?;

        let anatomizations = register_counter_vec_with_registry!(
            Opts::new(
                "conversation_anatomizations_total",
                "Topic decomposition attempts by outcome"
            ),
            &["outcome"],
            registry
        )?;

        let topic_excerpts = register_gauge_with_registry!(
            Opts::new("conversation_topic_excerpts", "Excerpts held in the topic index"),
            registry
        )?;

        let relevance_lookups = register_counter_vec_with_registry!(
            Opts::new("conversation_relevance_lookups_total", "Relevant-topic lookups by outcome"),
            &["outcome"],
            registry
        )?;

        let completion_duration = register_histogram_vec_with_registry!(
            "conversation_completion_duration_seconds",
            "Completion service call duration in seconds",
            &["purpose"],
            registry
        )?;

        Ok(Self {
            registry,
            turns_appended,
            turns_evicted,
            ledger_total,
            compactions,
            anatomizations,
            topic_excerpts,
            relevance_lookups,
            completion_duration,
        })
    }

    pub fn record_append(&self, role: &str, ledger_total: usize) {
        self.turns_appended.with_label_values(&[role]).inc();
        self.ledger_total.set(ledger_total as f64);
    }

    pub fn record_eviction(&self, evicted: usize, ledger_total: usize) {
        self.turns_evicted.inc_by(evicted as f64);
        self.ledger_total.set(ledger_total as f64);
    }

    pub fn record_compaction(&self, outcome: &str) {
        self.compactions.with_label_values(&[outcome]).inc();
    }

    pub fn record_anatomization(&self, outcome: &str) {
        self.anatomizations.with_label_values(&[outcome]).inc();
    }

    pub fn record_topic_excerpts(&self, count: usize) {
        self.topic_excerpts.set(count as f64);
    }

    pub fn record_relevance(&self, outcome: &str) {
        self.relevance_lookups.with_label_values(&[outcome]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Time an expression against a labelled histogram
#[macro_export]
macro_rules! time_operation {
    ($histogram:expr, $label:expr, $operation:expr) => {{
        let timer = $histogram.with_label_values(&[$label]).start_timer();
        let result = $operation;
        timer.observe_duration();
        result
    }};
}
