// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {
    Count,
    Milliseconds,
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $( let _ = &$label_value; )*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $( let _ = &$label_value; )*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $( let _ = &$label_value; )*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

/// Initializes the descriptions for all the metrics in the SDK.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "cache_hits_total",
        Unit::Count,
        "Cache hits, labeled by cache (cw20balance, cw20invalid)."
    );
    describe_counter!(
        "cache_miss_total",
        Unit::Count,
        "Cache misses (absent, expired or unreadable), labeled by cache."
    );
    describe_histogram!(
        "batch_query_chunk_size",
        Unit::Count,
        "Number of targets per primary batch query."
    );
    describe_counter!(
        "batch_query_attempt_failed_total",
        Unit::Count,
        "Primary batch query attempts that failed."
    );
    describe_counter!(
        "batch_query_chunk_abandoned_total",
        Unit::Count,
        "Chunks that failed every attempt and contributed nothing."
    );
    describe_counter!(
        "fallback_requests_total",
        Unit::Count,
        "Single-item LCD balance queries, labeled by outcome."
    );
    describe_counter!(
        "invalid_contracts_marked_total",
        Unit::Count,
        "Contracts newly marked invalid after a 'no such contract' error."
    );
    describe_counter!(
        "aggregation_cycles_total",
        Unit::Count,
        "Aggregation cycles, labeled by source (cache, batch, fallback, empty, failed)."
    );
    describe_histogram!(
        "aggregation_cycle_duration_ms",
        Unit::Milliseconds,
        "Wall time of one aggregation cycle."
    );
    describe_gauge!(
        "aggregation_cycles_in_flight",
        "Aggregation cycles currently running."
    );
}

pub fn increment_cache_hit(cache_name: &str) {
    counter!("cache_hits_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("cache_miss_total", 1, "cache" => cache_name.to_string());
}

pub fn record_batch_chunk_size(size: usize) {
    histogram!("batch_query_chunk_size", size as f64);
}

pub fn increment_batch_attempt_failed(attempt: usize) {
    counter!("batch_query_attempt_failed_total", 1, "attempt" => attempt.to_string());
}

pub fn increment_batch_chunk_abandoned() {
    counter!("batch_query_chunk_abandoned_total", 1);
}

pub fn increment_fallback_request(outcome: &'static str) {
    counter!("fallback_requests_total", 1, "outcome" => outcome);
}

pub fn increment_invalid_contracts_marked(count: usize) {
    counter!("invalid_contracts_marked_total", count as u64);
}

pub fn increment_aggregation_cycle(source: &'static str) {
    counter!("aggregation_cycles_total", 1, "source" => source);
}

pub fn record_aggregation_cycle_duration(duration: std::time::Duration) {
    histogram!("aggregation_cycle_duration_ms", duration.as_secs_f64() * 1000.0);
}

pub fn set_cycles_in_flight(count: usize) {
    gauge!("aggregation_cycles_in_flight", count as f64);
}
