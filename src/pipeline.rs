//! Per-frame orchestration: detect, sanitise, track, classify, aggregate.
//!
//! The pipeline owns no tracking or counting logic. It sequences the detector,
//! `TrackMatcher` and `SessionAggregator` and assembles the `FrameResult`.

use std::time::Instant;

use crate::aggregate::SessionAggregator;
use crate::detect::{RawDetection, RipenessLabel, SharedDetector};
use crate::error::InferenceError;
use crate::frame::ImageFrame;
use crate::schema::{Detection, FrameResult, ModelMeta, CLASS_NAME};
use crate::track::{TrackMatcher, TrackerConfig};

/// State for one stream connection. Never shared across connections.
#[derive(Debug)]
pub struct StreamSession {
    pub tracker: TrackMatcher,
    pub aggregator: SessionAggregator,
    /// Index of the next frame; increments once per processed frame.
    pub frame_index: u64,
}

impl StreamSession {
    pub fn new(tracker_config: TrackerConfig) -> Self {
        Self {
            tracker: TrackMatcher::new(tracker_config),
            aggregator: SessionAggregator::new(),
            frame_index: 0,
        }
    }
}

pub struct InferencePipeline {
    detector: SharedDetector,
    model_version: String,
    schema_version: String,
    tracker_config: TrackerConfig,
}

impl InferencePipeline {
    pub fn new(
        detector: SharedDetector,
        model_version: impl Into<String>,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            model_version: model_version.into(),
            schema_version: schema_version.into(),
            tracker_config: TrackerConfig::default(),
        }
    }

    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn model_meta(&self) -> ModelMeta {
        let (adapter, loaded) = match self.detector.lock() {
            Ok(guard) => (guard.name().to_string(), guard.is_loaded()),
            Err(_) => ("unavailable".to_string(), false),
        };
        ModelMeta {
            model_version: self.model_version.clone(),
            schema_version: self.schema_version.clone(),
            adapter,
            loaded,
        }
    }

    pub fn create_stream_session(&self) -> StreamSession {
        StreamSession::new(self.tracker_config)
    }

    /// One-shot inference on a disposable session. Returns the result and the
    /// wall-clock time spent in milliseconds.
    pub fn infer_image(&self, frame: &ImageFrame) -> Result<(FrameResult, f64), InferenceError> {
        let mut session = self.create_stream_session();
        let start = Instant::now();
        let result = self.infer_frame(frame, &mut session, 0, false)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok((result, elapsed_ms))
    }

    /// Streaming inference: identities come from the session's tracker.
    pub fn infer_stream_frame(
        &self,
        frame: &ImageFrame,
        session: &mut StreamSession,
        timestamp_ms: u64,
    ) -> Result<FrameResult, InferenceError> {
        self.infer_frame(frame, session, timestamp_ms, true)
    }

    fn infer_frame(
        &self,
        frame: &ImageFrame,
        session: &mut StreamSession,
        timestamp_ms: u64,
        use_track: bool,
    ) -> Result<FrameResult, InferenceError> {
        let (height, width, _) = frame.dims()?;
        let (raw, labels) = self.detect(frame)?;

        let mut track_ids: Vec<Option<u64>> = vec![None; raw.len()];
        if use_track {
            for tracked in session.tracker.update(&raw) {
                track_ids[tracked.index] = Some(tracked.track_id);
            }
        }

        let detections: Vec<Detection> = raw
            .iter()
            .zip(&labels)
            .zip(&track_ids)
            .map(|((det, &ripeness), &track_id)| Detection {
                bbox: sanitize_bbox(det.bbox, width, height),
                class_name: CLASS_NAME.to_string(),
                ripeness,
                confidence: sanitize_confidence(det.confidence),
                track_id,
            })
            .collect();

        session.aggregator.update_session(&labels, &track_ids);
        let frame_summary = session.aggregator.frame_summary(&labels);

        let result = FrameResult {
            frame_index: session.frame_index,
            timestamp_ms,
            detections,
            frame_summary,
        };
        session.frame_index += 1;
        Ok(result)
    }

    /// Detector call and label mapping under one lock; session bookkeeping
    /// happens after the lock is released.
    fn detect(
        &self,
        frame: &ImageFrame,
    ) -> Result<(Vec<RawDetection>, Vec<RipenessLabel>), InferenceError> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| InferenceError::unavailable("detector lock poisoned"))?;
        if !detector.is_loaded() {
            return Err(InferenceError::unavailable("Detector is not loaded"));
        }
        let raw = detector.predict(frame).map_err(InferenceError::Backend)?;
        let labels = raw
            .iter()
            .map(|det| detector.ripeness_from_class_id(det.class_id))
            .collect();
        Ok((raw, labels))
    }
}

/// Clamp a box into `[0, W-1] x [0, H-1]` and order its corners.
pub fn sanitize_bbox(bbox: [f32; 4], width: usize, height: usize) -> [f32; 4] {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let clamp = |v: f32, hi: f32| v.max(0.0).min(hi);
    let (mut x1, mut y1) = (clamp(bbox[0], max_x), clamp(bbox[1], max_y));
    let (mut x2, mut y2) = (clamp(bbox[2], max_x), clamp(bbox[3], max_y));
    if x2 < x1 {
        std::mem::swap(&mut x1, &mut x2);
    }
    if y2 < y1 {
        std::mem::swap(&mut y1, &mut y2);
    }
    [x1, y1, x2, y2]
}

fn sanitize_confidence(confidence: f32) -> f32 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
