//! Request and storage metrics, exposed as Prometheus text and as a JSON
//! summary.
//!
//! Each [`Metrics`] owns its own registry, so several servers (or tests) in
//! one process never share counters.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use prometheus::core::Collector;
use prometheus::proto::Metric;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;

use crate::store::StorageStats;

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

pub struct Metrics {
    registry: Registry,
    started: Instant,
    requests: IntCounterVec,
    errors: IntCounterVec,
    responses: IntCounterVec,
    latency: HistogramVec,
    uptime: Gauge,
    assets: IntGauge,
    storage_bytes: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("trove_http_requests_total", "Total HTTP requests"),
            &["method", "route"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("trove_http_errors_total", "HTTP responses with a 4xx or 5xx status"),
            &["method", "route"],
        )?;
        let responses = IntCounterVec::new(
            Opts::new("trove_http_responses_total", "HTTP responses by status code"),
            &["code"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "trove_http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "route"],
        )?;
        let uptime = Gauge::new("trove_uptime_seconds", "Time since service start in seconds")?;
        let assets = IntGauge::new("trove_assets_total", "Number of registered assets")?;
        let storage_bytes = IntGauge::new(
            "trove_storage_bytes_total",
            "Bytes held by current asset payloads",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(responses.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(uptime.clone()))?;
        registry.register(Box::new(assets.clone()))?;
        registry.register(Box::new(storage_bytes.clone()))?;

        Ok(Self {
            registry,
            started: Instant::now(),
            requests,
            errors,
            responses,
            latency,
            uptime,
            assets,
            storage_bytes,
        })
    }

    /// Records one finished request. `route` is the matched route template,
    /// never the raw path, so asset ids do not become label values.
    pub fn observe_request(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        let labels = [method, route];
        self.requests.with_label_values(&labels).inc();
        if status >= 400 {
            self.errors.with_label_values(&labels).inc();
        }
        self.responses
            .with_label_values(&[status.to_string().as_str()])
            .inc();
        self.latency
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
    }

    /// Prometheus text exposition. Storage gauges keep their last values
    /// when `storage` is unavailable.
    pub fn render(&self, storage: Option<StorageStats>) -> prometheus::Result<String> {
        self.uptime.set(self.started.elapsed().as_secs_f64());
        if let Some(stats) = storage {
            self.assets.set(stats.total_assets);
            self.storage_bytes.set(stats.total_storage_bytes);
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn summary(&self, storage: Option<StorageStats>) -> MetricsSummary {
        let requests_by_endpoint = counts(&self.requests);
        let errors_by_endpoint = counts(&self.errors);
        let total_requests: u64 = requests_by_endpoint.values().sum();
        let total_errors: u64 = errors_by_endpoint.values().sum();

        let error_rate = if total_requests == 0 {
            0.0
        } else {
            round_to(total_errors as f64 / total_requests as f64, 4)
        };

        let avg_response_time_ms = by_labels(&self.latency, |m| {
            let histogram = m.get_histogram();
            let count = histogram.get_sample_count();
            (count > 0).then(|| round_to(histogram.get_sample_sum() / count as f64 * 1000.0, 2))
        });

        MetricsSummary {
            uptime_seconds: round_to(self.started.elapsed().as_secs_f64(), 2),
            total_requests,
            total_errors,
            error_rate,
            requests_by_endpoint,
            errors_by_endpoint,
            status_code_counts: counts(&self.responses),
            avg_response_time_ms,
            storage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    /// Keyed by `"{method} {route}"`.
    pub requests_by_endpoint: BTreeMap<String, u64>,
    pub errors_by_endpoint: BTreeMap<String, u64>,
    pub status_code_counts: BTreeMap<String, u64>,
    pub avg_response_time_ms: BTreeMap<String, f64>,
    /// Absent when the database could not be queried.
    pub storage: Option<StorageStats>,
}

fn counts(vec: &IntCounterVec) -> BTreeMap<String, u64> {
    by_labels(vec, |m| Some(m.get_counter().get_value() as u64))
}

/// One entry per label combination, keyed by the label values joined with a
/// space. Label pairs come back sorted by label name.
fn by_labels<C, T>(collector: &C, value: impl Fn(&Metric) -> Option<T>) -> BTreeMap<String, T>
where
    C: Collector,
{
    collector
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .filter_map(|metric| {
            let key = metric
                .get_label()
                .iter()
                .map(|pair| pair.get_value())
                .collect::<Vec<_>>()
                .join(" ");
            value(metric).map(|v| (key, v))
        })
        .collect()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
