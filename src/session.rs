//! Streaming session protocol.
//!
//! One `StreamProtocol` per connection. Inbound messages are handled strictly
//! one at a time while the session is `Open`; a close command or a transport
//! disconnect moves it to `Closing`, and `finish` moves it to `Closed` while
//! producing the summary envelope exactly once.
//!
//! ```text
//! Open --(close|stop|eos, disconnect, send failure)--> Closing --finish--> Closed
//!  ^ |
//!  +-+ frame / error replies
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::error::InferenceError;
use crate::frame::decode_image_bytes;
use crate::pipeline::{InferencePipeline, StreamSession};
use crate::schema::{SessionSummary, StreamEnvelope};

/// Text commands that end a session, compared after trim + lowercase.
pub const CLOSE_COMMANDS: [&str; 3] = ["close", "stop", "eos"];

pub const UNSUPPORTED_COMMAND: &str = "Unsupported text command";
pub const EMPTY_PAYLOAD: &str = "Empty frame payload";

/// One message from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Disconnect,
}

impl Inbound {
    /// True when handling this message decodes and runs the detector.
    pub fn is_frame(&self) -> bool {
        matches!(self, Inbound::Binary(payload) if !payload.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Duplex transport seen by [`run_session`].
pub trait SessionTransport {
    /// Block until the next inbound message. Transport loss is `Inbound::Disconnect`.
    fn recv(&mut self) -> Inbound;

    fn send(&mut self, envelope: StreamEnvelope) -> Result<()>;
}

pub struct StreamProtocol {
    pipeline: Arc<InferencePipeline>,
    session: StreamSession,
    state: SessionState,
    started: Instant,
}

impl StreamProtocol {
    pub fn new(pipeline: Arc<InferencePipeline>) -> Self {
        let session = pipeline.create_stream_session();
        Self {
            pipeline,
            session,
            state: SessionState::Open,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_processed(&self) -> u64 {
        self.session.frame_index
    }

    /// Handle one inbound message. Returns the reply to send, if any.
    ///
    /// Messages arriving once the session has left `Open` are ignored.
    pub fn handle(&mut self, message: Inbound) -> Option<StreamEnvelope> {
        if self.state != SessionState::Open {
            return None;
        }
        match message {
            Inbound::Disconnect => {
                self.state = SessionState::Closing;
                None
            }
            Inbound::Text(text) if text.is_empty() => Some(StreamEnvelope::error(EMPTY_PAYLOAD)),
            Inbound::Text(text) => {
                let command = text.trim().to_lowercase();
                if CLOSE_COMMANDS.contains(&command.as_str()) {
                    self.state = SessionState::Closing;
                    None
                } else {
                    Some(StreamEnvelope::error(UNSUPPORTED_COMMAND))
                }
            }
            Inbound::Binary(payload) if payload.is_empty() => {
                Some(StreamEnvelope::error(EMPTY_PAYLOAD))
            }
            Inbound::Binary(payload) => Some(match self.process_frame(&payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    log::debug!(
                        "stream frame {} rejected: {}",
                        self.session.frame_index,
                        err
                    );
                    StreamEnvelope::error(err.to_string())
                }
            }),
        }
    }

    /// Request termination without a transport message (e.g. a failed send).
    pub fn close(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Closing;
        }
    }

    /// Enter `Closed` and build the summary envelope. Returns `None` after the first call.
    pub fn finish(&mut self) -> Option<StreamEnvelope> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        let summary = self.session.aggregator.build_summary();
        log::info!(
            "stream session closed after {} frames: {} unique, {:?}",
            self.session.frame_index,
            summary.total_detected,
            summary.harvest_suggestion
        );
        Some(StreamEnvelope::Summary {
            model_version: self.pipeline.model_version().to_string(),
            schema_version: self.pipeline.schema_version().to_string(),
            summary,
        })
    }

    fn process_frame(&mut self, payload: &[u8]) -> Result<StreamEnvelope, InferenceError> {
        let timestamp_ms = self.started.elapsed().as_millis() as u64;
        let frame = decode_image_bytes(payload)?;
        let result = self
            .pipeline
            .infer_stream_frame(&frame, &mut self.session, timestamp_ms)?;
        Ok(StreamEnvelope::Frame {
            model_version: self.pipeline.model_version().to_string(),
            schema_version: self.pipeline.schema_version().to_string(),
            result,
        })
    }
}

/// Drive a session to completion over `transport`.
///
/// Replies are sent in arrival order; a failed reply send ends the session.
/// The summary is always attempted and a failure to deliver it is ignored.
pub fn run_session<T: SessionTransport>(
    mut protocol: StreamProtocol,
    transport: &mut T,
) -> SessionSummary {
    while protocol.state() == SessionState::Open {
        let message = transport.recv();
        if let Some(reply) = protocol.handle(message) {
            if let Err(err) = transport.send(reply) {
                log::debug!("stream reply not delivered, closing session: {err:#}");
                protocol.close();
            }
        }
    }

    let Some(envelope) = protocol.finish() else {
        return SessionSummary::default();
    };
    let summary = match &envelope {
        StreamEnvelope::Summary { summary, .. } => summary.clone(),
        _ => SessionSummary::default(),
    };
    if let Err(err) = transport.send(envelope) {
        log::debug!("session summary not delivered: {err:#}");
    }
    summary
}
