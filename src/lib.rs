//! Lychee ripeness inference service.
//!
//! Detects lychee fruit in images, classifies each fruit's ripeness, and over a
//! streamed sequence of frames keeps stable identities so every physical fruit
//! is counted once. A session ends with ripeness ratios and a harvest
//! suggestion.
//!
//! # Module Structure
//!
//! - `detect`: detector backends (stub, tract/ONNX) behind `DetectorBackend`
//! - `frame`: decoded image frames
//! - `track`: greedy IoU identity assignment
//! - `aggregate`: deduplicated session counting and the harvest rule
//! - `pipeline`: per-frame orchestration for one-shot and stream inference
//! - `session`: stream session protocol and lifecycle
//! - `schema`: wire types
//! - `api`: HTTP + WebSocket transport
//! - `config`: JSON config file with env overrides

pub mod aggregate;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod schema;
pub mod session;
pub mod track;

pub use aggregate::{harvest_suggestion, SessionAggregator};
pub use config::{LycheeConfig, ModelSettings};
pub use detect::{DetectorBackend, RawDetection, RipenessLabel, SharedDetector};
pub use error::InferenceError;
pub use frame::{decode_image_bytes, ImageFrame};
pub use pipeline::{InferencePipeline, StreamSession};
pub use schema::{
    Detection, FrameResult, FrameSummary, HarvestSuggestion, RipenessCounts, RipenessRatio,
    SessionSummary, StreamEnvelope,
};
pub use session::{run_session, Inbound, SessionState, SessionTransport, StreamProtocol};
pub use track::{TrackMatcher, TrackerConfig};
