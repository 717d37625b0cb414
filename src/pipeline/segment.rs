//! Neural palm line segmentation.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, Array4, ArrayD};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::{Tensor, ValueType};
use rayon::prelude::*;

use super::resize::Resizer;
use crate::{
    config::{ResizeConfig, SegmentConfig},
    error::{PalmError, Result},
};

/// Frozen line segmentation network.
///
/// Takes a `[1, 3, S, S]` tensor of RGB values in `[0, 1]` and returns per-pixel
/// line scores, nominally `[1, 1, S, S]`. Implementations must not keep state
/// between calls.
pub trait SegmentationModel: Send + Sync {
    fn predict(&self, input: Array4<f32>) -> Result<ArrayD<f32>>;
}

/// ONNX Runtime session behind a mutex, shareable across requests.
pub struct OrtSegmentationModel {
    session: Mutex<Session>,
}

impl OrtSegmentationModel {
    pub fn load(model_path: &Path, cfg: &SegmentConfig) -> Result<Self> {
        if !model_path.exists() {
            return Err(PalmError::model_load(model_path, "checkpoint file not found"));
        }

        let session = build_session(model_path, cfg.intra_threads)
            .map_err(|err| PalmError::model_load(model_path, format!("{err:#}")))?;

        let size = cfg.input_size as usize;
        let expected = [1, 3, size, size];
        let input = session
            .inputs
            .first()
            .ok_or_else(|| PalmError::model_load(model_path, "model declares no inputs"))?;
        if let ValueType::Tensor { shape, .. } = &input.input_type {
            let declared: Vec<i64> = shape.iter().copied().collect();
            let compatible = declared.len() == expected.len()
                && declared
                    .iter()
                    .zip(expected)
                    .all(|(&d, e)| d < 0 || d as usize == e);
            if !compatible {
                return Err(PalmError::SegmentationShapeMismatch {
                    expected: expected.to_vec(),
                    actual: declared.iter().map(|&d| d.max(0) as usize).collect(),
                });
            }
        }

        log::info!(
            "palm line segmenter loaded from {} (input {size}x{size})",
            model_path.display()
        );
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

fn build_session(model_path: &Path, intra_threads: usize) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;
    Ok(session)
}

impl SegmentationModel for OrtSegmentationModel {
    fn predict(&self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| PalmError::Inference("segmentation session lock poisoned".into()))?;
        let tensor = Tensor::from_array(input)?;
        let outputs = session.run(ort::inputs![tensor])?;
        if outputs.len() < 1 {
            return Err(PalmError::Inference("segmentation model returned no outputs".into()));
        }
        let scores = outputs[0].try_extract_array::<f32>()?.to_owned();
        Ok(scores)
    }
}

/// Per-pixel line probability at the network resolution, indexed `[y, x]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityMap(pub Array2<f32>);

impl ProbabilityMap {
    pub fn dimensions(&self) -> (u32, u32) {
        let (h, w) = self.0.dim();
        (w as u32, h as u32)
    }

    pub fn threshold(&self, cutoff: f32) -> LineMask {
        let (w, h) = self.dimensions();
        LineMask(GrayImage::from_fn(w, h, |x, y| {
            if self.0[[y as usize, x as usize]] > cutoff {
                Luma([255])
            } else {
                Luma([0])
            }
        }))
    }
}

/// Binary line mask: 255 marks a line pixel, 0 background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineMask(pub GrayImage);

impl LineMask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        x < self.width() && y < self.height() && self.0.get_pixel(x, y).0[0] != 0
    }

    pub fn set(&mut self, x: u32, y: u32) {
        if x < self.width() && y < self.height() {
            self.0.put_pixel(x, y, Luma([255]));
        }
    }

    pub fn count(&self) -> usize {
        self.0.pixels().filter(|p| p.0[0] != 0).count()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.0
    }
}

#[derive(Clone, Debug)]
pub struct Segmentation {
    pub probabilities: ProbabilityMap,
    pub mask: LineMask,
}

pub struct LineSegmenter {
    model: Arc<dyn SegmentationModel>,
    cfg: SegmentConfig,
    resizer: Resizer,
}

impl LineSegmenter {
    pub fn new(model: Arc<dyn SegmentationModel>, cfg: SegmentConfig) -> Self {
        Self {
            model,
            cfg,
            resizer: Resizer::new(ResizeConfig::default()),
        }
    }

    pub fn segment(&mut self, image: &RgbImage) -> Result<Segmentation> {
        let size = self.cfg.input_size;
        let resized = self.resizer.resize_square(image, size)?;
        let input = to_nchw_tensor(&resized)?;

        let raw = self.model.predict(input)?;
        let side = size as usize;
        let shape = raw.shape().to_vec();
        let mut probs = match shape[..] {
            [1, 1, h, w] | [1, h, w] if h == side && w == side => raw
                .into_shape_with_order((side, side))
                .map_err(|err| PalmError::Inference(format!("segmentation output: {err}")))?,
            _ => {
                return Err(PalmError::SegmentationShapeMismatch {
                    expected: vec![1, 1, side, side],
                    actual: shape,
                });
            }
        };
        if self.cfg.apply_sigmoid {
            probs.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
        }

        let probabilities = ProbabilityMap(probs);
        let mask = probabilities.threshold(self.cfg.threshold);
        log::info!(
            "segmented {size}x{size} canonical image: {} line pixels",
            mask.count()
        );
        Ok(Segmentation {
            probabilities,
            mask,
        })
    }
}

fn to_nchw_tensor(image: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; plane * 3];
    let raw = image.as_raw();
    data.par_chunks_mut(plane)
        .enumerate()
        .for_each(|(c, channel)| {
            for (i, v) in channel.iter_mut().enumerate() {
                *v = raw[i * 3 + c] as f32 / 255.0;
            }
        });
    Array4::from_shape_vec((1, 3, h, w), data)
        .map_err(|err| PalmError::Inference(format!("failed to build input tensor: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    /// Marks pixels whose red channel is bright, ignoring the rest.
    struct RedChannelModel;

    impl SegmentationModel for RedChannelModel {
        fn predict(&self, input: Array4<f32>) -> Result<ArrayD<f32>> {
            let (_, _, h, w) = input.dim();
            let out = Array4::from_shape_fn((1, 1, h, w), |(_, _, y, x)| {
                if input[[0, 0, y, x]] > 0.5 { 8.0 } else { -8.0 }
            });
            Ok(out.into_dyn())
        }
    }

    struct WrongShapeModel;

    impl SegmentationModel for WrongShapeModel {
        fn predict(&self, _input: Array4<f32>) -> Result<ArrayD<f32>> {
            Ok(ArrayD::zeros(IxDyn(&[1, 2, 8, 8])))
        }
    }

    fn config(size: u32) -> SegmentConfig {
        SegmentConfig {
            input_size: size,
            ..SegmentConfig::default()
        }
    }

    #[test]
    fn mask_follows_model_scores() {
        let mut img = RgbImage::new(32, 32);
        for x in 4..28 {
            img.put_pixel(x, 10, image::Rgb([255, 0, 0]));
        }
        let mut segmenter = LineSegmenter::new(Arc::new(RedChannelModel), config(32));
        let out = segmenter.segment(&img).unwrap();
        assert_eq!(out.mask.width(), 32);
        assert_eq!(out.mask.count(), 24);
        assert!(out.mask.is_set(4, 10));
        assert!(!out.mask.is_set(4, 11));
        assert!(out.probabilities.0[[10, 4]] > 0.99);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let img = RgbImage::from_fn(32, 32, |x, y| image::Rgb([((x * y) % 256) as u8, 0, 0]));
        let mut segmenter = LineSegmenter::new(Arc::new(RedChannelModel), config(32));
        let a = segmenter.segment(&img).unwrap();
        let b = segmenter.segment(&img).unwrap();
        assert_eq!(a.mask, b.mask);
    }

    #[test]
    fn wrong_output_shape_is_reported() {
        let mut segmenter = LineSegmenter::new(Arc::new(WrongShapeModel), config(8));
        let err = segmenter.segment(&RgbImage::new(8, 8)).unwrap_err();
        assert!(matches!(
            err,
            PalmError::SegmentationShapeMismatch { ref actual, .. } if actual == &vec![1, 2, 8, 8]
        ));
    }

    #[test]
    fn missing_checkpoint_is_model_load_error() {
        let err = OrtSegmentationModel::load(
            Path::new("definitely/not/here.onnx"),
            &SegmentConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PalmError::ModelLoad { .. }));
    }
}
