use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, Encoder};

/// Prometheus collectors for the planner.
///
/// Wrapped in an `Arc` and shared by the dispatcher, the report listeners and
/// the telemetry loop. Navigator collectors register into the same
/// [`Registry`] so one `/metrics` endpoint serves the whole run.
pub struct Metrics {
    pub registry: Registry,
    /// Dispatch cycles started (one per robot popped from the queue).
    pub dispatch_cycles_total: IntCounter,
    /// Paths published to robots.
    pub assignments_total: IntCounter,
    /// Cycles given up, by reason.
    pub abandoned_cycles_total: IntCounterVec,
    /// Robot state reports received.
    pub reports_ingested_total: IntCounter,
    pub destinations_available: IntGauge,
    /// Highest idleness over all destinations, seconds.
    pub max_idleness_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("patrol".into()), None)
            .expect("Failed to create custom metrics registry");

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry
                    .register(Box::new(collector.clone()))
                    .expect("Failed to register metric");
                collector
            }};
        }

        Self {
            dispatch_cycles_total: reg!(IntCounter::new(
                "planner_dispatch_cycles_total",
                "Dispatch cycles started"
            )
            .unwrap()),
            assignments_total: reg!(IntCounter::new(
                "planner_assignments_total",
                "Paths assigned to robots"
            )
            .unwrap()),
            abandoned_cycles_total: reg!(IntCounterVec::new(
                Opts::new("planner_abandoned_cycles_total", "Dispatch cycles abandoned"),
                &["reason"]
            )
            .unwrap()),
            reports_ingested_total: reg!(IntCounter::new(
                "planner_reports_ingested_total",
                "Robot state reports received"
            )
            .unwrap()),
            destinations_available: reg!(IntGauge::new(
                "planner_destinations_available",
                "Destinations currently available"
            )
            .unwrap()),
            max_idleness_seconds: reg!(Gauge::new(
                "planner_max_idleness_seconds",
                "Highest destination idleness in seconds"
            )
            .unwrap()),
            registry,
        }
    }

    /// Creates an `axum::Router` that serves the metrics on `/metrics`.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    let encoder = TextEncoder::new();
                    encoder
                        .encode(&metric_families, &mut buffer)
                        .expect("Failed to encode metrics");
                    String::from_utf8(buffer)
                        .expect("Metrics buffer is not valid UTF-8")
                        .into_response()
                }
            }),
        )
    }

    pub fn abandon(&self, reason: &str) {
        self.abandoned_cycles_total.with_label_values(&[reason]).inc();
    }

    pub fn update_destinations(&self, available: usize, max_idleness: f64) {
        self.destinations_available.set(available as i64);
        self.max_idleness_seconds.set(max_idleness);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
