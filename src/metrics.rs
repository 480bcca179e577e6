//! Prometheus metrics registry and metric definitions.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("accident_map_api".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Total bounding-box marker queries composed
pub static MARKER_QUERY_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("marker_queries_total", "Total number of marker queries");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Marker queries answered without evaluating every filter, by reason
pub static SHORT_CIRCUIT_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "marker_query_short_circuits_total",
        "Marker queries that returned early because a toggle hides everything",
    );
    let c = IntCounterVec::new(opts, &["reason"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of marker query durations (count + fetch)
pub static MARKER_QUERY_HISTOGRAM: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "marker_query_duration_seconds",
        "Duration of marker queries in seconds",
    );
    let h = Histogram::with_opts(opts).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Rows committed by the news-flash CSV importer
pub static NEWS_FLASH_ROWS_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "news_flash_rows_ingested_total",
        "Total number of news-flash rows committed",
    );
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// HTTP responses by route and status
pub static HTTP_RESPONSES_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("http_responses_total", "HTTP responses by route and status");
    let c = IntCounterVec::new(opts, &["route", "status"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}
