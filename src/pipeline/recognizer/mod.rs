//! Hand landmark detection feeding the rectifier.

pub mod common;
mod ort;
pub mod palm;

use image::RgbImage;

use crate::{error::Result, types::HandLandmarks};

pub use self::ort::OrtHandLandmarker;

/// Locates hand keypoints in an image, in that image's pixel coordinates.
///
/// `Ok(None)` means no hand was found; errors are reserved for runtime faults.
pub trait LandmarkDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<HandLandmarks>>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<HandLandmarks>> {
        (**self).detect(image)
    }
}
