//! Prometheus metrics for the HTTP service, rendered at `GET /metrics`.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

const HTTP_LATENCY_BUCKETS: [f64; 9] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Counters and histograms on a registry owned by this value, so every
/// router (and every test) starts from zero.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reports_generated: IntCounter,
    lessons_saved: IntCounter,
    http_requests: IntCounterVec,
    http_request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let reports_generated =
            IntCounter::new("reports_generated_total", "Total PDF reports generated")?;
        let lessons_saved = IntCounter::new("lessons_saved_total", "Total lesson records saved")?;
        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "path", "status_code"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )?;

        registry.register(Box::new(reports_generated.clone()))?;
        registry.register(Box::new(lessons_saved.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            registry,
            reports_generated,
            lessons_saved,
            http_requests,
            http_request_duration,
        })
    }

    pub fn report_generated(&self) {
        self.reports_generated.inc();
    }

    pub fn lesson_saved(&self) {
        self.lessons_saved.inc();
    }

    /// `path` is the route pattern, not the raw URI, to keep label sets bounded.
    pub fn observe_http(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, path, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(elapsed.as_secs_f64());
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|error| prometheus::Error::Msg(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_and_counts_business_events() {
        let metrics = Metrics::new().unwrap();
        let before = metrics.render().unwrap();
        assert!(before.contains("reports_generated_total 0"));
        assert!(before.contains("lessons_saved_total 0"));

        metrics.report_generated();
        metrics.lesson_saved();
        metrics.lesson_saved();

        let after = metrics.render().unwrap();
        assert!(after.contains("reports_generated_total 1"));
        assert!(after.contains("lessons_saved_total 2"));
    }

    #[test]
    fn http_requests_are_labelled_by_route_pattern() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_http("GET", "/api/students/:student_id", 404, Duration::from_millis(3));

        let text = metrics.render().unwrap();
        let line = text
            .lines()
            .find(|line| line.starts_with("http_requests_total{"))
            .unwrap();
        assert!(line.contains(r#"path="/api/students/:student_id""#));
        assert!(line.contains(r#"status_code="404""#));
        assert!(line.ends_with(" 1"));
        assert!(text.contains("http_request_duration_seconds_count"));
    }

    #[test]
    fn registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.report_generated();
        assert!(second.render().unwrap().contains("reports_generated_total 0"));
    }
}
