//! Cross-frame deduplicated counting and the harvest rule.

use std::collections::HashSet;

use crate::detect::RipenessLabel;
use crate::schema::{
    FrameSummary, HarvestSuggestion, RipenessCounts, RipenessRatio, SessionSummary,
};

const READY_RED_RATIO: f64 = 0.7;
const READY_YOUNG_RATIO_LIMIT: f64 = 0.15;
const PARTIAL_RED_HALF_RATIO: f64 = 0.4;

/// Session-scoped tally. Objects with a track identity count once.
#[derive(Clone, Debug, Default)]
pub struct SessionAggregator {
    seen_track_ids: HashSet<u64>,
    total_unique: u64,
    counts: RipenessCounts,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_unique(&self) -> u64 {
        self.total_unique
    }

    pub fn counts(&self) -> RipenessCounts {
        self.counts
    }

    /// Tally of this frame's labels only.
    pub fn frame_summary(&self, labels: &[RipenessLabel]) -> FrameSummary {
        let mut summary = FrameSummary::default();
        for &label in labels {
            summary.record(label);
        }
        summary
    }

    /// Fold one frame into the session counts.
    ///
    /// `labels` and `track_ids` are parallel. A detection whose identity was
    /// already counted is skipped; detections without an identity always count.
    pub fn update_session(&mut self, labels: &[RipenessLabel], track_ids: &[Option<u64>]) {
        for (&label, &track_id) in labels.iter().zip(track_ids) {
            if let Some(id) = track_id {
                if !self.seen_track_ids.insert(id) {
                    continue;
                }
            }
            self.total_unique += 1;
            self.counts.increment(label);
        }
    }

    pub fn build_summary(&self) -> SessionSummary {
        let ratios = if self.total_unique == 0 {
            RipenessRatio::default()
        } else {
            let total = self.total_unique as f64;
            RipenessRatio {
                green: self.counts.green as f64 / total,
                half: self.counts.half as f64 / total,
                red: self.counts.red as f64 / total,
                young: self.counts.young as f64 / total,
            }
        };
        SessionSummary {
            total_detected: self.total_unique,
            ripeness_ratio: ratios,
            harvest_suggestion: harvest_suggestion(&ratios),
        }
    }
}

/// Harvest rule, first match wins. Never yields `OverripeRisk`.
pub fn harvest_suggestion(ratios: &RipenessRatio) -> HarvestSuggestion {
    if ratios.red >= READY_RED_RATIO && ratios.young < READY_YOUNG_RATIO_LIMIT {
        HarvestSuggestion::Ready
    } else if ratios.red + ratios.half >= PARTIAL_RED_HALF_RATIO {
        HarvestSuggestion::PartiallyReady
    } else {
        HarvestSuggestion::NotReady
    }
}
