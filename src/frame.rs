//! Image frames handed to the detector.
//!
//! - `ImageFrame`: interleaved pixel grid with an explicit shape (`[height, width, channels]`).
//! - `decode_image_bytes`: compressed bytes (JPEG/PNG) to an RGB `ImageFrame`.
//!
//! The shape is carried as a plain slice so malformed frames can be represented
//! and rejected by the pipeline instead of by the constructor.

use image::RgbImage;

use crate::error::InferenceError;

/// Interleaved 8-bit pixel grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFrame {
    data: Vec<u8>,
    shape: Vec<usize>,
}

impl ImageFrame {
    /// Wrap raw bytes with an arbitrary shape. Shape is checked by [`ImageFrame::dims`].
    pub fn new(data: Vec<u8>, shape: Vec<usize>) -> Self {
        Self { data, shape }
    }

    /// Zero-filled `height x width x channels` frame.
    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        Self {
            data: vec![0; height * width * channels],
            shape: vec![height, width, channels],
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            shape: vec![height as usize, width as usize, 3],
            data: image.into_raw(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Validated `(height, width, channels)`.
    ///
    /// Fails unless the frame is a non-empty three-dimensional grid whose byte
    /// length matches its shape.
    pub fn dims(&self) -> Result<(usize, usize, usize), InferenceError> {
        let &[height, width, channels] = self.shape.as_slice() else {
            return Err(InferenceError::invalid_input(format!(
                "expected image frame with shape [H, W, C], got {:?}",
                self.shape
            )));
        };
        if height == 0 || width == 0 || channels == 0 {
            return Err(InferenceError::invalid_input(format!(
                "image frame has an empty dimension: {:?}",
                self.shape
            )));
        }
        let expected = height
            .checked_mul(width)
            .and_then(|v| v.checked_mul(channels))
            .ok_or_else(|| InferenceError::invalid_input("image frame dimensions overflow"))?;
        if expected != self.data.len() {
            return Err(InferenceError::invalid_input(format!(
                "image frame shape {:?} needs {} bytes, received {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok((height, width, channels))
    }
}

/// Decode a compressed image into an RGB frame.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<ImageFrame, InferenceError> {
    let image = image::load_from_memory(bytes)
        .map_err(|err| InferenceError::Decode(format!("Invalid image bytes: {err}")))?;
    Ok(ImageFrame::from_rgb(image.to_rgb8()))
}
