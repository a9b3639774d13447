use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build Prometheus exporter: {0}")]
    Exporter(String),
}

/// Why a frame produced no result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Decode,
    Unloaded,
    Inference,
    Encode,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Decode => "decode",
            DropReason::Unloaded => "unloaded",
            DropReason::Inference => "inference",
            DropReason::Encode => "encode",
        }
    }
}

pub struct Metrics {
    frames_received: Counter<u64>,
    frames_dropped: Counter<u64>,
    results_sent: Counter<u64>,
    inference_duration: Histogram<u64>,
    model_swaps: Counter<u64>,
    active_sessions: UpDownCounter<i64>,
    provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("yolo_tracking");

        let frames_received = meter
            .u64_counter("frames_received_total")
            .with_description("Frames received over streaming sessions")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped_total")
            .with_description("Frames that produced no result, by reason")
            .build();

        let results_sent = meter
            .u64_counter("results_sent_total")
            .with_description("Frame results sent to clients")
            .build();

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(generate_boundaries((5, 25, 45, 245, 1045)))
            .with_description("Duration of decode, detection and tracking per frame in milliseconds")
            .build();

        let model_swaps = meter
            .u64_counter("model_swaps_total")
            .with_description("Model swap requests, by outcome")
            .build();

        let active_sessions = meter
            .i64_up_down_counter("active_sessions")
            .with_description("Currently connected streaming sessions")
            .build();

        Ok(Metrics {
            frames_received,
            frames_dropped,
            results_sent,
            inference_duration,
            model_swaps,
            active_sessions,
            provider,
            registry,
        })
    }

    /// Makes this provider the process-wide one, which the HTTP metrics
    /// layer records into.
    pub fn install_global(&self) {
        global::set_meter_provider(self.provider.clone());
    }

    pub fn record_frame_received(&self) {
        self.frames_received.add(1, &[]);
    }

    pub fn record_frame_dropped(&self, reason: DropReason) {
        let attributes = [KeyValue::new("reason", reason.as_str())];
        self.frames_dropped.add(1, &attributes);
    }

    pub fn record_result_sent(&self) {
        self.results_sent.add(1, &[]);
    }

    pub fn record_inference_duration(&self, duration_ms: u64, model: &str) {
        let attributes = [KeyValue::new("model", model.to_string())];
        self.inference_duration.record(duration_ms, &attributes);
    }

    pub fn record_model_swap(&self, outcome: &'static str) {
        let attributes = [KeyValue::new("outcome", outcome)];
        self.model_swaps.add(1, &attributes);
    }

    pub fn session_opened(&self) {
        self.active_sessions.add(1, &[]);
    }

    pub fn session_closed(&self) {
        self.active_sessions.add(-1, &[]);
    }

    #[cfg(test)]
    fn gathered_total(&self, prefix: &str) -> f64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name().starts_with(prefix))
            .flat_map(|family| family.get_metric().iter())
            .map(|metric| metric.get_counter().value() + metric.get_gauge().value())
            .sum()
    }

    #[cfg(test)]
    pub fn dropped_frames(&self) -> u64 {
        self.gathered_total("frames_dropped") as u64
    }

    #[cfg(test)]
    pub fn active_sessions(&self) -> i64 {
        self.gathered_total("active_sessions") as i64
    }
}

/// Fine buckets for fast frames, coarser ones for the slow tail.
fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 10;
    let end_step: usize = 50;
    let tail_step: usize = 200;
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
