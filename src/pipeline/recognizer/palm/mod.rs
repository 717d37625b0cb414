mod anchors;

use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use image::RgbImage;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::types::PalmRegion;

use super::common::{LetterboxInfo, PALM_INPUT_SIZE, prepare_frame_with_size};

pub use anchors::generate_anchors;

const PALM_LANDMARKS: usize = 7;
const BOX_FEATURES: usize = 4 + PALM_LANDMARKS * 2;

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 4,
        }
    }
}

pub struct PalmDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: generate_anchors(PALM_INPUT_SIZE),
            cfg,
        })
    }

    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = prepare_frame_with_size(image, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;

        decode_palm_outputs(
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            boxes.shape(),
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            scores.shape(),
            &self.anchors,
            &letterbox,
            &self.cfg,
        )
    }
}

/// Last two dimensions of a `[batch, anchors, features]` tensor.
fn trailing_dims(shape: &[usize], what: &str) -> Result<(usize, usize)> {
    match shape {
        [.., anchors, features] if shape.len() >= 3 => Ok((*anchors, *features)),
        _ => Err(anyhow!(
            "unexpected {what} shape {shape:?}, need [batch, anchors, features]"
        )),
    }
}

fn decode_palm_outputs(
    boxes: &[f32],
    box_shape: &[usize],
    scores: &[f32],
    score_shape: &[usize],
    anchors: &[[f32; 2]],
    letterbox: &LetterboxInfo,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    let (anchor_dim, feature_dim) = trailing_dims(box_shape, "palm box")?;
    let (score_anchor_dim, score_feature_dim) = trailing_dims(score_shape, "palm score")?;

    if feature_dim < BOX_FEATURES {
        return Err(anyhow!(
            "palm box feature dimension too small: {feature_dim}"
        ));
    }
    if anchor_dim != score_anchor_dim {
        return Err(anyhow!(
            "anchor dimension mismatch between boxes ({anchor_dim}) and scores ({score_anchor_dim})"
        ));
    }

    let pad_bias_x = letterbox.pad_x / letterbox.scale;
    let pad_bias_y = letterbox.pad_y / letterbox.scale;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let input = PALM_INPUT_SIZE as f32;

    let mut candidates = Vec::new();
    for (anchor_idx, anchor) in anchors.iter().take(anchor_dim).enumerate() {
        let raw_score = *scores
            .get(anchor_idx * score_feature_dim)
            .ok_or_else(|| anyhow!("missing score for palm anchor {anchor_idx}"))?;
        let score = sigmoid(raw_score);
        if score < cfg.score_threshold {
            continue;
        }

        let offset = anchor_idx * feature_dim;
        let feats = boxes
            .get(offset..offset + BOX_FEATURES)
            .ok_or_else(|| anyhow!("missing box features for palm anchor {anchor_idx}"))?;

        // Offsets are in input pixels relative to the anchor center.
        let to_image = |dx: f32, dy: f32| {
            (
                (dx / input + anchor[0]) * scale - pad_bias_x,
                (dy / input + anchor[1]) * scale - pad_bias_y,
            )
        };

        let (cx, cy, bw, bh) = (feats[0], feats[1], feats[2], feats[3]);
        let (x1, y1) = to_image(cx - bw / 2.0, cy - bh / 2.0);
        let (x2, y2) = to_image(cx + bw / 2.0, cy + bh / 2.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let max_x = letterbox.orig_w.saturating_sub(1) as f32;
        let max_y = letterbox.orig_h.saturating_sub(1) as f32;
        let landmarks = feats[4..]
            .chunks_exact(2)
            .map(|p| to_image(p[0], p[1]))
            .collect();

        candidates.push(PalmRegion {
            bbox: [
                x1.clamp(0.0, max_x),
                y1.clamp(0.0, max_y),
                x2.clamp(0.0, max_x),
                y2.clamp(0.0, max_y),
            ],
            landmarks,
            score,
        });
    }

    let kept = nms(&candidates, cfg.nms_threshold, cfg.top_k);
    Ok(kept.into_iter().map(|idx| candidates[idx].clone()).collect())
}

pub fn pick_primary_region(regions: &[PalmRegion]) -> Option<&PalmRegion> {
    regions
        .iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
}

/// Center, side and rotation of the square crop fed to the landmark estimator.
pub fn crop_from_palm(region: &PalmRegion) -> ((f32, f32), f32, f32) {
    let center = if region.landmarks.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        mean_point(&region.landmarks)
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    let landmark_span = if region.landmarks.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region
            .landmarks
            .iter()
            .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
                (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
            });
        (max_x - min_x).max(max_y - min_y)
    };
    // Expand generously to avoid cropping fingers away.
    let side = base_w.max(base_h).max(landmark_span).max(80.0) * 2.4;

    (center, side, estimate_orientation(region))
}

/// Rotation that turns the palm keypoints' principal axis upright.
pub fn estimate_orientation(region: &PalmRegion) -> f32 {
    if region.landmarks.len() < 2 {
        return 0.0;
    }

    let mean = mean_point(&region.landmarks);
    let n = region.landmarks.len() as f32;
    let (cov_xx, cov_xy, cov_yy) =
        region
            .landmarks
            .iter()
            .fold((0.0_f32, 0.0_f32, 0.0_f32), |acc, (x, y)| {
                let dx = x - mean.0;
                let dy = y - mean.1;
                (acc.0 + dx * dx, acc.1 + dx * dy, acc.2 + dy * dy)
            });
    let (cov_xx, cov_xy, cov_yy) = (cov_xx / n, cov_xy / n, cov_yy / n);

    let trace = cov_xx + cov_yy;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let lambda1 = (trace * 0.5 + ((trace * 0.5).powi(2) - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if cov_xy.abs() > 1e-6 {
        (lambda1 - cov_yy, cov_xy)
    } else if cov_xx >= cov_yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}

fn mean_point(points: &[(f32, f32)]) -> (f32, f32) {
    let (sx, sy) = points
        .iter()
        .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let n = points.len().max(1) as f32;
    (sx / n, sy / n)
}

fn nms(candidates: &[PalmRegion], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .score
            .partial_cmp(&candidates[a].score)
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        if keep.len() >= top_k {
            break;
        }
        let overlaps = keep
            .iter()
            .any(|&k| iou(&candidates[idx].bbox, &candidates[k].bbox) >= threshold);
        if !overlaps {
            keep.push(idx);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bbox: [f32; 4], score: f32) -> PalmRegion {
        PalmRegion {
            bbox,
            landmarks: Vec::new(),
            score,
        }
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let candidates = vec![
            region([0.0, 0.0, 10.0, 10.0], 0.6),
            region([1.0, 1.0, 11.0, 11.0], 0.9),
            region([50.0, 50.0, 60.0, 60.0], 0.7),
        ];
        assert_eq!(nms(&candidates, 0.3, 8), vec![1, 2]);
    }

    #[test]
    fn decodes_single_confident_anchor() {
        let anchors = generate_anchors(PALM_INPUT_SIZE);
        let n = anchors.len();
        let mut boxes = vec![0.0f32; n * BOX_FEATURES];
        let mut scores = vec![-10.0f32; n];
        let hit = 300;
        scores[hit] = 5.0;
        boxes[hit * BOX_FEATURES + 2] = 40.0;
        boxes[hit * BOX_FEATURES + 3] = 40.0;

        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 192,
            orig_h: 192,
        };
        let regions = decode_palm_outputs(
            &boxes,
            &[1, n, BOX_FEATURES],
            &scores,
            &[1, n, 1],
            &anchors,
            &letterbox,
            &PalmDetectorConfig::default(),
        )
        .unwrap();

        assert_eq!(regions.len(), 1);
        let [x1, _, x2, _] = regions[0].bbox;
        assert!((x2 - x1 - 40.0).abs() < 1e-3);
        assert_eq!(regions[0].landmarks.len(), PALM_LANDMARKS);
    }

    #[test]
    fn upright_palm_needs_no_rotation() {
        let palm = PalmRegion {
            bbox: [0.0, 0.0, 100.0, 100.0],
            landmarks: vec![(50.0, 10.0), (50.0, 40.0), (51.0, 70.0), (50.0, 95.0)],
            score: 1.0,
        };
        assert!(estimate_orientation(&palm).abs() < 0.05);
    }
}
