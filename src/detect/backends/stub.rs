use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::ImageFrame;

/// Stub backend for testing and demos. Returns the same detections for every frame.
#[derive(Default)]
pub struct StubBackend {
    detections: Vec<RawDetection>,
    loaded: bool,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub that is already loaded and answers with `detections`.
    pub fn loaded_with(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            loaded: true,
            calls: 0,
        }
    }

    /// Number of successful `predict` calls.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn predict(&mut self, _frame: &ImageFrame) -> Result<Vec<RawDetection>> {
        if !self.loaded {
            return Err(anyhow!("Model is not loaded"));
        }
        self.calls += 1;
        Ok(self.detections.clone())
    }
}
