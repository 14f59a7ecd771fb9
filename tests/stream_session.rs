use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use lychee_ripe::detect::{
    DetectorBackend, RawDetection, RipenessLabel, SharedDetector, StubBackend,
};
use lychee_ripe::{
    run_session, HarvestSuggestion, ImageFrame, Inbound, InferencePipeline, SessionTransport,
    StreamEnvelope, StreamProtocol,
};

fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(160, 120, image::Rgb([200, 30, 50]));
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png");
    out
}

/// Replays scripted inbound messages, then reports a disconnect.
struct ScriptedTransport {
    inbound: VecDeque<Inbound>,
    sent: Vec<StreamEnvelope>,
    /// Sends after this many successful ones fail.
    fail_after: Option<usize>,
}

impl ScriptedTransport {
    fn new(inbound: Vec<Inbound>) -> Self {
        Self {
            inbound: inbound.into(),
            sent: Vec::new(),
            fail_after: None,
        }
    }

    fn failing_after(mut self, sends: usize) -> Self {
        self.fail_after = Some(sends);
        self
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.sent.iter().map(StreamEnvelope::kind).collect()
    }
}

impl SessionTransport for ScriptedTransport {
    fn recv(&mut self) -> Inbound {
        self.inbound.pop_front().unwrap_or(Inbound::Disconnect)
    }

    fn send(&mut self, envelope: StreamEnvelope) -> Result<()> {
        if self.fail_after.is_some_and(|limit| self.sent.len() >= limit) {
            return Err(anyhow!("peer went away"));
        }
        self.sent.push(envelope);
        Ok(())
    }
}

/// Detector that replays one detection list per call.
struct SequenceBackend {
    frames: VecDeque<Vec<RawDetection>>,
}

impl DetectorBackend for SequenceBackend {
    fn name(&self) -> &str {
        "sequence"
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn predict(&mut self, _frame: &ImageFrame) -> Result<Vec<RawDetection>> {
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

fn pipeline_for(detector: SharedDetector) -> Arc<InferencePipeline> {
    Arc::new(InferencePipeline::new(detector, "1.0.0", "v1"))
}

fn stub_pipeline(detections: Vec<RawDetection>) -> Arc<InferencePipeline> {
    pipeline_for(Arc::new(Mutex::new(StubBackend::loaded_with(detections))))
}

#[test]
fn three_frames_then_close_yield_three_results_and_one_summary() {
    let pipeline = stub_pipeline(vec![RawDetection::new([5.0, 5.0, 30.0, 30.0], 1, 0.8)]);
    let frame = png_bytes();
    let mut transport = ScriptedTransport::new(vec![
        Inbound::Binary(frame.clone()),
        Inbound::Binary(frame.clone()),
        Inbound::Binary(frame),
        Inbound::Text("close".into()),
        Inbound::Text("ignored after close".into()),
    ]);

    let summary = run_session(StreamProtocol::new(pipeline), &mut transport);

    assert_eq!(transport.kinds(), vec!["frame", "frame", "frame", "summary"]);
    for (expected, envelope) in transport.sent[..3].iter().enumerate() {
        let StreamEnvelope::Frame { result, .. } = envelope else {
            panic!("expected frame envelope");
        };
        assert_eq!(result.frame_index, expected as u64);
        assert_eq!(result.detections[0].track_id, Some(1));
    }
    assert_eq!(summary.total_detected, 1);
    assert_eq!(summary.harvest_suggestion, HarvestSuggestion::PartiallyReady);
    assert_eq!(transport.inbound.len(), 1);
}

#[test]
fn disconnect_still_flushes_summary() {
    let pipeline = stub_pipeline(vec![RawDetection::new([5.0, 5.0, 30.0, 30.0], 2, 0.8)]);
    let mut transport = ScriptedTransport::new(vec![Inbound::Binary(png_bytes())]);

    let summary = run_session(StreamProtocol::new(pipeline), &mut transport);

    assert_eq!(transport.kinds(), vec!["frame", "summary"]);
    assert_eq!(summary.total_detected, 1);
    assert_eq!(summary.harvest_suggestion, HarvestSuggestion::Ready);
}

#[test]
fn failed_summary_delivery_is_swallowed() {
    let pipeline = stub_pipeline(Vec::new());
    let mut transport = ScriptedTransport::new(vec![
        Inbound::Binary(png_bytes()),
        Inbound::Text("stop".into()),
    ])
    .failing_after(1);

    let summary = run_session(StreamProtocol::new(pipeline), &mut transport);

    assert_eq!(transport.kinds(), vec!["frame"]);
    assert_eq!(summary.total_detected, 0);
}

#[test]
fn failed_reply_ends_session() {
    let pipeline = stub_pipeline(Vec::new());
    let frame = png_bytes();
    let mut transport = ScriptedTransport::new(vec![
        Inbound::Binary(frame.clone()),
        Inbound::Binary(frame.clone()),
        Inbound::Binary(frame),
    ])
    .failing_after(0);

    run_session(StreamProtocol::new(pipeline), &mut transport);

    assert!(transport.sent.is_empty());
    assert_eq!(transport.inbound.len(), 2);
}

#[test]
fn bad_frames_do_not_abort_the_session() {
    let pipeline = stub_pipeline(vec![RawDetection::new([1.0, 1.0, 9.0, 9.0], 0, 0.6)]);
    let mut transport = ScriptedTransport::new(vec![
        Inbound::Binary(b"not an image".to_vec()),
        Inbound::Binary(Vec::new()),
        Inbound::Text("rewind".into()),
        Inbound::Binary(png_bytes()),
        Inbound::Text("eos".into()),
    ]);

    let summary = run_session(StreamProtocol::new(pipeline), &mut transport);

    assert_eq!(
        transport.kinds(),
        vec!["error", "error", "error", "frame", "summary"]
    );
    let StreamEnvelope::Frame { result, .. } = &transport.sent[3] else {
        panic!("expected frame envelope");
    };
    assert_eq!(result.frame_index, 0);
    assert_eq!(summary.total_detected, 1);
}

#[test]
fn moving_fruit_keeps_identity_and_counts_once() {
    let frames = vec![
        vec![
            RawDetection::new([10.0, 10.0, 40.0, 40.0], 2, 0.9),
            RawDetection::new([100.0, 10.0, 130.0, 40.0], 3, 0.7),
        ],
        vec![
            RawDetection::new([12.0, 11.0, 42.0, 41.0], 2, 0.9),
            RawDetection::new([101.0, 10.0, 131.0, 40.0], 3, 0.7),
        ],
        // A new fruit appears, the young one is briefly missed.
        vec![
            RawDetection::new([14.0, 12.0, 44.0, 42.0], 2, 0.9),
            RawDetection::new([60.0, 60.0, 90.0, 90.0], 1, 0.8),
        ],
        vec![
            RawDetection::new([102.0, 11.0, 132.0, 41.0], 3, 0.7),
            RawDetection::new([16.0, 13.0, 46.0, 43.0], 2, 0.9),
        ],
    ];
    let detector: SharedDetector = Arc::new(Mutex::new(SequenceBackend {
        frames: frames.into(),
    }));
    let pipeline = pipeline_for(detector);
    let frame = png_bytes();
    let mut inbound: Vec<Inbound> = (0..4).map(|_| Inbound::Binary(frame.clone())).collect();
    inbound.push(Inbound::Text("close".into()));
    let mut transport = ScriptedTransport::new(inbound);

    let summary = run_session(StreamProtocol::new(pipeline), &mut transport);

    let ids: Vec<Vec<Option<u64>>> = transport.sent[..4]
        .iter()
        .map(|envelope| match envelope {
            StreamEnvelope::Frame { result, .. } => {
                result.detections.iter().map(|d| d.track_id).collect()
            }
            other => panic!("unexpected {}", other.kind()),
        })
        .collect();
    assert_eq!(
        ids,
        vec![
            vec![Some(1), Some(2)],
            vec![Some(1), Some(2)],
            vec![Some(1), Some(3)],
            vec![Some(2), Some(1)],
        ]
    );

    assert_eq!(summary.total_detected, 3);
    let ratio = summary.ripeness_ratio;
    assert!((ratio.red - 1.0 / 3.0).abs() < 1e-9);
    assert!((ratio.young - 1.0 / 3.0).abs() < 1e-9);
    assert!((ratio.half - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(ratio.green, 0.0);
    assert_eq!(summary.harvest_suggestion, HarvestSuggestion::PartiallyReady);

    let StreamEnvelope::Frame { result, .. } = &transport.sent[3] else {
        panic!("expected frame envelope");
    };
    assert_eq!(result.detections[0].ripeness, RipenessLabel::Young);
}

#[test]
fn sessions_do_not_share_identities() {
    let pipeline = stub_pipeline(vec![RawDetection::new([5.0, 5.0, 30.0, 30.0], 2, 0.8)]);
    for _ in 0..2 {
        let mut transport = ScriptedTransport::new(vec![Inbound::Binary(png_bytes())]);
        let summary = run_session(StreamProtocol::new(pipeline.clone()), &mut transport);
        let StreamEnvelope::Frame { result, .. } = &transport.sent[0] else {
            panic!("expected frame envelope");
        };
        assert_eq!(result.detections[0].track_id, Some(1));
        assert_eq!(summary.total_detected, 1);
    }
}
