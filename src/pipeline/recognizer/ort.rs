use std::path::Path;

use anyhow::{Context, anyhow};
use image::RgbImage;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    LandmarkDetector,
    common::{self, INPUT_SIZE},
    palm::{PalmDetector, PalmDetectorConfig, crop_from_palm, pick_primary_region},
};
use crate::{
    error::{PalmError, Result},
    types::HandLandmarks,
};

/// Two-stage MediaPipe hand landmarker: palm detection, then 21-point estimation
/// on a rotated crop around the strongest palm.
pub struct OrtHandLandmarker {
    handpose: Session,
    palm_detector: PalmDetector,
}

impl OrtHandLandmarker {
    pub fn new(handpose_model_path: &Path, palm_detector_model_path: &Path) -> Result<Self> {
        let handpose = load_session(handpose_model_path)
            .map_err(|err| PalmError::model_load(handpose_model_path, format!("{err:#}")))?;

        let palm_detector =
            PalmDetector::new(palm_detector_model_path, PalmDetectorConfig::default()).map_err(
                |err| PalmError::model_load(palm_detector_model_path, format!("{err:#}")),
            )?;

        log::info!(
            "hand landmarker ready using {} and palm detector {}",
            handpose_model_path.display(),
            palm_detector_model_path.display()
        );

        Ok(Self {
            handpose,
            palm_detector,
        })
    }

    fn infer(&mut self, image: &RgbImage) -> anyhow::Result<Option<HandLandmarks>> {
        let palm_regions = self.palm_detector.detect(image)?;
        let Some(selected) = pick_primary_region(&palm_regions) else {
            log::info!("no palm found in {}x{} image", image.width(), image.height());
            return Ok(None);
        };
        let palm_score = selected.score;
        let (center, side, angle) = crop_from_palm(selected);

        let (input, transform) =
            common::prepare_rotated_crop(image, center, side, angle, INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_landmarks(&flattened)?;

        let confidence = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let points = common::project_landmarks_with_transform(&landmarks, &transform);
        let confidence = (confidence * palm_score).clamp(0.0, 1.0);
        log::debug!(
            "hand landmarks: {} points, palm score {palm_score:.3}, confidence {confidence:.3}",
            points.len()
        );

        Ok(Some(HandLandmarks::new(points, confidence)))
    }
}

fn load_session(model_path: &Path) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
    Ok(session)
}

impl LandmarkDetector for OrtHandLandmarker {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<HandLandmarks>> {
        self.infer(image)
            .map_err(|err| PalmError::Inference(format!("hand landmark detection: {err:#}")))
    }
}
