use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::{RawDetection, RipenessLabel};
use crate::frame::ImageFrame;

/// Detector shared by every session. The mutex serialises `predict` calls.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

/// Detector backend trait.
///
/// Backends are swappable model runtimes. The pipeline only relies on this
/// surface; it never looks inside a backend.
pub trait DetectorBackend: Send {
    /// Backend identifier, reported as the model adapter.
    fn name(&self) -> &str;

    /// True once `load` has succeeded.
    fn is_loaded(&self) -> bool;

    /// Load model weights. The service keeps running degraded if this fails.
    fn load(&mut self) -> Result<()>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run detection on a frame.
    ///
    /// Must fail when the backend is not loaded. Implementations treat the
    /// pixel data as read-only.
    fn predict(&mut self, frame: &ImageFrame) -> Result<Vec<RawDetection>>;

    /// Map a class id to a ripeness label. Never fails.
    fn ripeness_from_class_id(&self, class_id: u32) -> RipenessLabel {
        RipenessLabel::from_class_id(class_id)
    }
}
