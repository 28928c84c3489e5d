use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder};

static SEND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("delivery_send_total", "Send requests by outcome"),
        &["outcome"],
    )
    .expect("failed to create delivery_send_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_send_total");
    counter
});

static RELAY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "delivery_relay_duration_seconds",
            "Relay dispatch latency by provider",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
        &["provider"],
    )
    .expect("failed to create delivery_relay_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register delivery_relay_duration_seconds");
    histogram
});

static RECONCILE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_reconcile_events_total",
            "Inbound provider events by kind and result",
        ),
        &["kind", "result"],
    )
    .expect("failed to create delivery_reconcile_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_reconcile_events_total");
    counter
});

/// `sent`, `duplicate` or `failed`
pub fn record_send(outcome: &str) {
    SEND_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_relay(provider: &str, elapsed: Duration) {
    RELAY_DURATION_SECONDS
        .with_label_values(&[provider])
        .observe(elapsed.as_secs_f64());
}

/// `kind` is `message`, `status` or `media`; `result` is `matched`,
/// `inserted`, `unmatched`, `ignored` or `failed`.
pub fn record_reconcile(kind: &str, result: &str) {
    RECONCILE_EVENTS_TOTAL.with_label_values(&[kind, result]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
