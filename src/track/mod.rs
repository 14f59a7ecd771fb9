//! Frame-to-frame identity assignment.
//!
//! `TrackMatcher` keeps the last box of every live track and greedily hands
//! each incoming detection the unassigned track it overlaps most. Matching is
//! frame-local with no lookahead, so it is not a globally optimal assignment.
//! Equal-IoU candidates go to the oldest live track because tracks are kept in
//! creation order; a different enumeration order could pick differently.
//!
//! Known gap: when two detections both overlap one prior track above the
//! threshold, the detection listed first claims it, even if the later one
//! overlaps more. The higher-IoU detection keeps the identity only when it
//! precedes the other in the detector's output.

use serde::Deserialize;

use crate::detect::RawDetection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MAX_MISSING: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to keep a track's identity.
    pub iou_threshold: f32,
    /// Consecutive missed frames tolerated before a track is evicted.
    pub max_missing: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_missing: DEFAULT_MAX_MISSING,
        }
    }
}

/// A detection paired with the identity assigned to it this frame.
///
/// `index` is the detection's position in the slice passed to
/// [`TrackMatcher::update`]; callers correlate by it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedDetection {
    pub index: usize,
    pub detection: RawDetection,
    pub track_id: u64,
}

#[derive(Clone, Debug)]
struct Track {
    id: u64,
    bbox: [f32; 4],
    missed: u32,
}

/// Greedy IoU tracker. One instance per stream session.
#[derive(Debug)]
pub struct TrackMatcher {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl TrackMatcher {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Number of live (not yet evicted) tracks.
    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Assign identities to one frame's detections.
    ///
    /// Call once per frame, in frame order. Every detection gets an identity:
    /// a matched track's id, or a freshly minted one.
    pub fn update(&mut self, detections: &[RawDetection]) -> Vec<TrackedDetection> {
        let mut assigned = vec![false; self.tracks.len()];
        let mut outputs = Vec::with_capacity(detections.len());

        for (index, det) in detections.iter().enumerate() {
            let mut best: Option<usize> = None;
            let mut best_iou = 0.0f32;
            for (slot, track) in self.tracks.iter().enumerate() {
                if assigned[slot] {
                    continue;
                }
                let overlap = iou(&det.bbox, &track.bbox);
                if overlap > best_iou && overlap >= self.config.iou_threshold {
                    best_iou = overlap;
                    best = Some(slot);
                }
            }

            let track_id = match best {
                Some(slot) => {
                    let track = &mut self.tracks[slot];
                    track.bbox = det.bbox;
                    track.missed = 0;
                    assigned[slot] = true;
                    track.id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        bbox: det.bbox,
                        missed: 0,
                    });
                    assigned.push(true);
                    id
                }
            };
            outputs.push(TrackedDetection {
                index,
                detection: *det,
                track_id,
            });
        }

        for (track, matched) in self.tracks.iter_mut().zip(&assigned) {
            if !matched {
                track.missed += 1;
            }
        }
        let max_missing = self.config.max_missing;
        self.tracks.retain(|track| {
            let keep = track.missed <= max_missing;
            if !keep {
                log::trace!("evicting track {} after {} missed frames", track.id, track.missed);
            }
            keep
        });

        outputs
    }
}

impl Default for TrackMatcher {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

/// Intersection-over-union of two `[x1, y1, x2, y2]` boxes.
///
/// Zero for disjoint or degenerate boxes; never NaN for finite input.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4]) -> RawDetection {
        RawDetection::new(bbox, 2, 0.9)
    }

    fn ids(tracked: &[TrackedDetection]) -> Vec<u64> {
        tracked.iter().map(|t| t.track_id).collect()
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_or_degenerate_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]), 0.0);
        assert_eq!(iou(&[5.0, 5.0, 5.0, 15.0], &[0.0, 0.0, 10.0, 10.0]), 0.0);
        assert_eq!(iou(&[10.0, 10.0, 0.0, 0.0], &[0.0, 0.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn identities_start_at_one_and_increase() {
        let mut tracker = TrackMatcher::default();
        let out = tracker.update(&[
            det([0.0, 0.0, 10.0, 10.0]),
            det([100.0, 100.0, 110.0, 110.0]),
        ]);
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(out[1].index, 1);
    }

    #[test]
    fn overlapping_detection_keeps_identity_and_replaces_geometry() {
        let mut tracker = TrackMatcher::default();
        tracker.update(&[det([0.0, 0.0, 10.0, 10.0])]);
        let out = tracker.update(&[det([1.0, 1.0, 11.0, 11.0])]);
        assert_eq!(ids(&out), vec![1]);

        // Geometry is the last box, not a blend: this only overlaps the moved box.
        let out = tracker.update(&[det([4.0, 4.0, 14.0, 14.0])]);
        assert_eq!(ids(&out), vec![1]);
    }

    /// Documents the known gap: a lower-IoU detection listed first takes the
    /// track, so the higher-IoU one is minted a new identity.
    #[test]
    fn competing_detections_first_claim_wins_loser_gets_new_identity() {
        let mut tracker = TrackMatcher::default();
        tracker.update(&[det([0.0, 0.0, 10.0, 10.0])]);

        // First detection overlaps less than the second; both clear the threshold.
        let weaker = det([3.0, 0.0, 13.0, 10.0]);
        let stronger = det([1.0, 0.0, 11.0, 10.0]);
        assert!(iou(&weaker.bbox, &[0.0, 0.0, 10.0, 10.0]) >= DEFAULT_IOU_THRESHOLD);

        let out = tracker.update(&[weaker, stronger]);
        // Lower overlap, listed first: keeps identity 1. Higher overlap: new identity.
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(out[0].detection, weaker);
        assert_eq!(out[1].detection, stronger);

        let mut tracker = TrackMatcher::default();
        tracker.update(&[det([0.0, 0.0, 10.0, 10.0])]);
        // Higher overlap listed first: it keeps identity 1.
        let out = tracker.update(&[stronger, weaker]);
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(out[0].detection, stronger);
    }

    #[test]
    fn below_threshold_overlap_mints_new_identity() {
        let mut tracker = TrackMatcher::default();
        tracker.update(&[det([0.0, 0.0, 10.0, 10.0])]);
        let out = tracker.update(&[det([8.0, 8.0, 18.0, 18.0])]);
        assert_eq!(ids(&out), vec![2]);
    }

    #[test]
    fn track_survives_max_missing_frames_then_is_evicted() {
        let mut tracker = TrackMatcher::default();
        let spot = det([0.0, 0.0, 10.0, 10.0]);
        tracker.update(&[spot]);

        for _ in 0..DEFAULT_MAX_MISSING {
            tracker.update(&[]);
        }
        assert_eq!(tracker.live_tracks(), 1);
        assert_eq!(ids(&tracker.update(&[spot])), vec![1]);

        for _ in 0..=DEFAULT_MAX_MISSING {
            tracker.update(&[]);
        }
        assert_eq!(tracker.live_tracks(), 0);
        assert_eq!(ids(&tracker.update(&[spot])), vec![2]);
    }

    #[test]
    fn identities_are_never_reused() {
        let config = TrackerConfig {
            max_missing: 0,
            ..TrackerConfig::default()
        };
        let mut tracker = TrackMatcher::new(config);
        let spot = det([0.0, 0.0, 10.0, 10.0]);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.extend(ids(&tracker.update(&[spot])));
            tracker.update(&[]);
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn equal_iou_tie_goes_to_oldest_track() {
        let mut tracker = TrackMatcher::default();
        tracker.update(&[det([0.0, 0.0, 10.0, 10.0]), det([10.0, 0.0, 20.0, 10.0])]);
        // Straddles both tracks symmetrically.
        let out = tracker.update(&[det([5.0, 0.0, 15.0, 10.0])]);
        assert_eq!(ids(&out), vec![1]);
    }
}
