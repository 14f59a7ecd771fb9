use serde::{Deserialize, Serialize};

/// One detector output, before sanitisation.
///
/// `bbox` is `[x1, y1, x2, y2]` in image pixels and may be unordered or out of
/// bounds. `confidence` is whatever the model reported.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub class_id: u32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }
}

/// Closed set of ripeness classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RipenessLabel {
    Green,
    Half,
    Red,
    Young,
}

impl RipenessLabel {
    /// Default detector class map. Unknown ids fall back to `Green`.
    pub fn from_class_id(class_id: u32) -> Self {
        match class_id {
            0 => Self::Green,
            1 => Self::Half,
            2 => Self::Red,
            3 => Self::Young,
            _ => Self::Green,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Half => "half",
            Self::Red => "red",
            Self::Young => "young",
        }
    }
}
