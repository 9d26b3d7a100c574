use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    detections_per_request: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("detection_server");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(generate_boundaries((10, 100, 200, 1000, 5000)))
            .with_description("Duration of detection requests in milliseconds")
            .build();

        let detections_per_request = meter
            .u64_histogram("detections_per_request")
            .with_boundaries(vec![0., 1., 2., 5., 10., 20., 50., 100., 300.])
            .with_description("Number of objects returned per detection request")
            .build();

        Ok(Metrics {
            request_counter,
            detection_duration,
            detections_per_request,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection(&self, duration_ms: u64, detections: usize, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.detection_duration.record(duration_ms, &attributes);
        self.detections_per_request
            .record(detections as u64, &attributes);
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn encode(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 20;
    let end_step: usize = 100;
    let tail_step: usize = 1000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (10, 30, 70, 270, 2270);
        let get = generate_boundaries(parts);
        let expected = vec![
            10.0, 20.0, 30.0, 50.0, 70.0, 170.0, 270.0, 1270.0, 2270.0,
        ];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/api/detect");
        metrics.record_detection(42, 3, "/api/detect");

        let text = metrics.encode().unwrap();

        assert!(text.contains("requests_total"));
        assert!(text.contains("detection_duration_ms"));
    }
}
