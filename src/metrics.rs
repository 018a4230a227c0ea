use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};

use crate::{errors::AppError, models::Usage};

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_requests: IntGauge,
    backend_errors_total: IntCounterVec,
    tokens_total: IntCounterVec,
}

/// Holds the in-flight gauge up until dropped. Owned, so a streaming body can
/// carry it for the lifetime of the connection.
pub struct InflightGuard {
    gauge: IntGauge,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "adapter_http_requests_total",
                "Total HTTP requests handled by the adapter"
            ),
            &["path", "method", "status", "stream"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "adapter_http_request_duration_seconds",
                "Time until response headers were ready, in seconds",
            ),
            &["path", "method", "stream"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_requests = IntGauge::new(
            "adapter_inflight_requests",
            "Requests currently being served, including open streams",
        )
        .expect("valid inflight_requests metric");

        let backend_errors_total = IntCounterVec::new(
            opts!(
                "adapter_backend_errors_total",
                "Failed inferences by request mode and error kind"
            ),
            &["mode", "kind"],
        )
        .expect("valid backend_errors_total metric");

        let tokens_total = IntCounterVec::new(
            opts!(
                "adapter_approx_tokens_total",
                "Whitespace-counted prompt and completion words"
            ),
            &["kind"],
        )
        .expect("valid tokens_total metric");

        for collector in [
            Box::new(request_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(request_duration_seconds.clone()),
            Box::new(inflight_requests.clone()),
            Box::new(backend_errors_total.clone()),
            Box::new(tokens_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_requests,
            backend_errors_total,
            tokens_total,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard {
        self.inflight_requests.inc();
        InflightGuard {
            gauge: self.inflight_requests.clone(),
        }
    }

    pub fn inflight(&self) -> i64 {
        self.inflight_requests.get()
    }

    pub fn observe_request(
        &self,
        path: &str,
        method: &str,
        stream: bool,
        status: u16,
        duration: Duration,
    ) {
        let stream_label = if stream { "true" } else { "false" };
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, method, &status_label, stream_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method, stream_label])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_backend_error(&self, stream: bool, error: &AppError) {
        let mode = if stream { "stream" } else { "one_shot" };
        let kind = match error {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::BackendUnavailable(_) => "unavailable",
            AppError::Backend { .. } => "backend_status",
            AppError::Internal(_) => "internal",
        };
        self.backend_errors_total
            .with_label_values(&[mode, kind])
            .inc();
    }

    pub fn observe_usage(&self, usage: &Usage) {
        self.tokens_total
            .with_label_values(&["prompt"])
            .inc_by(u64::from(usage.prompt_tokens));
        self.tokens_total
            .with_label_values(&["completion"])
            .inc_by(u64::from(usage.completion_tokens));
        self.tokens_total
            .with_label_values(&["total"])
            .inc_by(u64::from(usage.total_tokens));
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_gauge_follows_guard_lifetime() {
        let metrics = AppMetrics::new();
        let guard = metrics.inflight_guard();
        let moved = std::thread::spawn(move || {
            let _guard = guard;
        });
        let _second = metrics.inflight_guard();
        moved.join().expect("guard thread exits");
        assert_eq!(metrics.inflight(), 1);
    }

    #[test]
    fn render_includes_observed_series() {
        let metrics = AppMetrics::new();
        metrics.observe_request("/v1/chat/completions", "POST", false, 200, Duration::from_millis(5));
        metrics.observe_backend_error(true, &AppError::BackendUnavailable("down".to_owned()));
        metrics.observe_usage(&Usage::new(3, 2));

        let body = metrics.render().expect("metrics render");
        assert!(body.contains("adapter_http_requests_total"));
        assert!(body.contains("mode=\"stream\""));
        assert!(body.contains("kind=\"unavailable\""));
        assert!(body.contains("adapter_approx_tokens_total{kind=\"total\"} 5"));
    }
}
