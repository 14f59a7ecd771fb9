//! Wire types shared by the HTTP and stream surfaces.

use serde::{Deserialize, Serialize};

use crate::detect::RipenessLabel;

/// Fixed object class reported for every detection.
pub const CLASS_NAME: &str = "lychee";

/// One sanitised detection: ordered, in-bounds box and clamped confidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub class_name: String,
    pub ripeness: RipenessLabel,
    pub confidence: f32,
    /// Present only for streaming frames.
    pub track_id: Option<u64>,
}

/// Counts per ripeness label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RipenessCounts {
    pub green: u64,
    pub half: u64,
    pub red: u64,
    pub young: u64,
}

impl RipenessCounts {
    pub fn increment(&mut self, label: RipenessLabel) {
        match label {
            RipenessLabel::Green => self.green += 1,
            RipenessLabel::Half => self.half += 1,
            RipenessLabel::Red => self.red += 1,
            RipenessLabel::Young => self.young += 1,
        }
    }
}

/// Per-frame tally by ripeness label. Serializes flat:
/// `{total, green, half, red, young}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub total: u64,
    #[serde(flatten)]
    pub counts: RipenessCounts,
}

impl FrameSummary {
    pub fn record(&mut self, label: RipenessLabel) {
        self.total += 1;
        self.counts.increment(label);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub detections: Vec<Detection>,
    pub frame_summary: FrameSummary,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RipenessRatio {
    pub green: f64,
    pub half: f64,
    pub red: f64,
    pub young: f64,
}

impl RipenessRatio {
    pub fn sum(&self) -> f64 {
        self.green + self.half + self.red + self.young
    }
}

/// Session-level harvest recommendation.
///
/// `OverripeRisk` is part of the output vocabulary but no rule produces it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestSuggestion {
    #[default]
    NotReady,
    PartiallyReady,
    Ready,
    OverripeRisk,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_detected: u64,
    pub ripeness_ratio: RipenessRatio,
    pub harvest_suggestion: HarvestSuggestion,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub model_version: String,
    pub schema_version: String,
    pub adapter: String,
    pub loaded: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageInferResponse {
    pub model_version: String,
    pub schema_version: String,
    pub inference_ms: f64,
    pub result: FrameResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: ModelMeta,
}

/// Messages sent to a stream client, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEnvelope {
    Frame {
        model_version: String,
        schema_version: String,
        result: FrameResult,
    },
    Summary {
        model_version: String,
        schema_version: String,
        summary: SessionSummary,
    },
    Error {
        detail: String,
    },
}

impl StreamEnvelope {
    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error {
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Frame { .. } => "frame",
            Self::Summary { .. } => "summary",
            Self::Error { .. } => "error",
        }
    }
}
