use crate::{
    config::TrackerConfig,
    detector::decode_frame,
    registry::{ModelRegistry, RegistryError},
    telemetry::{DropReason, Metrics},
    tracker::Tracker,
    translator::{translate, FrameResult},
};
use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to encode frame result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the transport handed us on one receive.
#[derive(Debug)]
pub enum Incoming {
    Frame(Bytes),
    /// Anything that is not a frame: text, ping, pong.
    Ignored,
    Close,
}

pub trait FrameTransport: Send {
    /// `None` once the peer is gone.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Incoming, SessionError>>> + Send;

    fn send(&mut self, text: String) -> impl Future<Output = Result<(), SessionError>> + Send;
}

impl FrameTransport for WebSocket {
    async fn recv(&mut self) -> Option<Result<Incoming, SessionError>> {
        let message = match WebSocket::recv(self).await? {
            Ok(message) => message,
            Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
        };

        Some(Ok(match message {
            Message::Binary(bytes) => Incoming::Frame(bytes),
            Message::Close(_) => Incoming::Close,
            _ => Incoming::Ignored,
        }))
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        WebSocket::send(self, Message::Text(text.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Connected,
    Receiving,
    Processing,
    Sending,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connected => "connected",
            SessionState::Receiving => "receiving",
            SessionState::Processing => "processing",
            SessionState::Sending => "sending",
            SessionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub results_sent: u64,
    /// Where the session was when it stopped; `Disconnected` once `run` returns.
    pub state: SessionState,
}

enum FrameOutcome {
    Processed { result: FrameResult, model: String },
    Dropped(DropReason),
}

fn process_frame(registry: &ModelRegistry, bytes: &[u8], tracker: &mut Tracker) -> FrameOutcome {
    let image = match decode_frame(bytes) {
        Ok(image) => image,
        Err(e) => {
            tracing::debug!("Dropping undecodable frame: {}", e);
            return FrameOutcome::Dropped(DropReason::Decode);
        }
    };

    match registry.infer(&image, tracker) {
        Ok(inference) => {
            let metadata = inference.model.metadata();
            FrameOutcome::Processed {
                result: translate(&inference.detections, metadata),
                model: metadata.name.clone(),
            }
        }
        Err(RegistryError::Unloaded) => FrameOutcome::Dropped(DropReason::Unloaded),
        Err(e) => {
            tracing::warn!("Dropping frame: {}", e);
            FrameOutcome::Dropped(DropReason::Inference)
        }
    }
}

pub fn encode_result(result: &FrameResult) -> Result<String, SessionError> {
    Ok(serde_json::to_string(result)?)
}

/// Drives one connection: receive a frame, run it through the registry,
/// send the result, repeat. One frame is fully handled before the next is
/// read, so results leave in the order frames arrived. Frames that cannot
/// be processed are dropped without a reply.
pub struct Session<T: FrameTransport> {
    id: u64,
    transport: T,
    registry: Arc<ModelRegistry>,
    metrics: Arc<Metrics>,
    tracker_config: TrackerConfig,
    tracker: Option<Tracker>,
    state: SessionState,
    summary: SessionSummary,
}

impl<T: FrameTransport> Session<T> {
    pub fn new(
        id: u64,
        transport: T,
        registry: Arc<ModelRegistry>,
        metrics: Arc<Metrics>,
        tracker_config: TrackerConfig,
    ) -> Self {
        Self {
            id,
            transport,
            registry,
            metrics,
            tracker: Some(Tracker::new(tracker_config.clone())),
            tracker_config,
            state: SessionState::Connected,
            summary: SessionSummary::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves the state machine and mirrors it onto the session span.
    fn transition(&mut self, next: SessionState) {
        self.state = next;
        self.summary.state = next;
        tracing::Span::current().record("state", next.as_str());
    }

    fn drop_frame(&mut self, reason: DropReason) {
        self.summary.frames_dropped += 1;
        self.metrics.record_frame_dropped(reason);
    }

    async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.transport.recv().await {
                None | Some(Ok(Incoming::Close)) => {
                    tracing::info!("Client disconnected");
                    return None;
                }
                Some(Err(e)) => {
                    tracing::warn!("Closing session: {}", e);
                    return None;
                }
                Some(Ok(Incoming::Ignored)) => continue,
                Some(Ok(Incoming::Frame(bytes))) => return Some(bytes),
            }
        }
    }

    async fn process(&mut self, bytes: Bytes) -> FrameOutcome {
        let registry = self.registry.clone();
        let mut tracker = self
            .tracker
            .take()
            .unwrap_or_else(|| Tracker::new(self.tracker_config.clone()));

        // the blocking task runs to completion even if this future is dropped
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = process_frame(&registry, &bytes, &mut tracker);
            (outcome, tracker)
        })
        .await;

        match joined {
            Ok((outcome, tracker)) => {
                self.tracker = Some(tracker);
                outcome
            }
            Err(e) => {
                tracing::error!("Frame processing task failed: {}", e);
                FrameOutcome::Dropped(DropReason::Inference)
            }
        }
    }

    #[instrument(skip(self), fields(session = self.id, state = self.state.as_str()))]
    pub async fn run(mut self) -> SessionSummary {
        tracing::info!("Client connected");
        self.metrics.session_opened();

        loop {
            self.transition(SessionState::Receiving);
            let Some(bytes) = self.next_frame().await else {
                break;
            };
            self.summary.frames_received += 1;
            self.metrics.record_frame_received();

            self.transition(SessionState::Processing);
            let started = Instant::now();
            let (result, model) = match self.process(bytes).await {
                FrameOutcome::Processed { result, model } => (result, model),
                FrameOutcome::Dropped(reason) => {
                    self.drop_frame(reason);
                    continue;
                }
            };
            self.metrics
                .record_inference_duration(started.elapsed().as_millis() as u64, &model);

            self.transition(SessionState::Sending);
            let text = match encode_result(&result) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("{}", e);
                    self.drop_frame(DropReason::Encode);
                    continue;
                }
            };
            tracing::debug!(detections = result.detections.len(), "Sending frame result");
            if let Err(e) = self.transport.send(text).await {
                tracing::warn!("Closing session: {}", e);
                break;
            }
            self.summary.results_sent += 1;
            self.metrics.record_result_sent();
        }

        self.transition(SessionState::Disconnected);
        self.metrics.session_closed();
        tracing::info!(
            frames_received = self.summary.frames_received,
            frames_dropped = self.summary.frames_dropped,
            results_sent = self.summary.results_sent,
            "Session closed"
        );
        self.summary
    }
}
