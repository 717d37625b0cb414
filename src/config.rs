//! Tunable parameters for the palm analysis pipeline.
//!
//! Every constant the stages rely on lives here so a request can be reproduced
//! from a single JSON file:
//!
//! ```no_run
//! use palm_lines::PipelineConfig;
//! use std::path::Path;
//!
//! let config = PipelineConfig::from_json_file(Path::new("palm.json"))?;
//! # Ok::<(), palm_lines::PalmError>(())
//! ```
//!
//! Missing sections and fields fall back to [`PipelineConfig::default`].

use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{PalmError, Result},
    model_download,
    types::{LineKind, keypoint},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub models: ModelPaths,
    pub background: BackgroundConfig,
    pub rectify: RectifyConfig,
    pub resize: ResizeConfig,
    pub segment: SegmentConfig,
    pub classify: ClassifyConfig,
    pub measure: MeasureConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub palm_detector: PathBuf,
    pub hand_landmarks: PathBuf,
    pub line_segmenter: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            palm_detector: model_download::default_palm_detector_model_path(),
            hand_landmarks: model_download::default_handpose_estimator_model_path(),
            line_segmenter: model_download::default_line_segmenter_model_path(),
        }
    }
}

/// Background stripping applied to the input and to the warped palm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Max RGB distance from the border color for a pixel to count as background.
    pub tolerance: f32,
    pub neutral: [u8; 3],
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            tolerance: 40.0,
            neutral: [0, 0, 0],
        }
    }
}

/// Target position of one hand keypoint in the canonical frame, normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplatePoint {
    pub keypoint: usize,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyConfig {
    pub canonical_size: u32,
    pub min_confidence: f32,
    /// Canonical targets: fingers up, wrist down, thumb on the right.
    pub template: Vec<TemplatePoint>,
    /// Fraction of the frame cropped from each side after warping.
    pub crop_margin: f32,
    pub fill: [u8; 3],
    /// Minimum ratio of minor to major landmark spread before the set counts as collinear.
    pub min_landmark_spread: f32,
    /// Minimum ratio of smallest to largest singular value of the normalized transform.
    pub min_transform_conditioning: f64,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        let template = vec![
            TemplatePoint { keypoint: keypoint::WRIST, x: 0.48, y: 0.95 },
            TemplatePoint { keypoint: keypoint::THUMB_CMC, x: 0.74, y: 0.84 },
            TemplatePoint { keypoint: keypoint::THUMB_MCP, x: 0.90, y: 0.66 },
            TemplatePoint { keypoint: keypoint::INDEX_MCP, x: 0.74, y: 0.22 },
            TemplatePoint { keypoint: keypoint::MIDDLE_MCP, x: 0.52, y: 0.18 },
            TemplatePoint { keypoint: keypoint::RING_MCP, x: 0.32, y: 0.21 },
            TemplatePoint { keypoint: keypoint::PINKY_MCP, x: 0.14, y: 0.29 },
        ];
        Self {
            canonical_size: 1024,
            min_confidence: 0.5,
            template,
            crop_margin: 0.02,
            fill: [0, 0, 0],
            min_landmark_spread: 0.05,
            min_transform_conditioning: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub full_size: u32,
    pub mini_size: u32,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            full_size: 1024,
            mini_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Square input side expected by the network.
    pub input_size: u32,
    pub threshold: f32,
    /// Apply a sigmoid to the network output; disable for models that emit probabilities.
    pub apply_sigmoid: bool,
    pub intra_threads: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            input_size: 256,
            threshold: 0.5,
            apply_sigmoid: true,
            intra_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Diagonal,
    Vertical,
}

/// Region of the canonical frame where a named line is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub kind: LineKind,
    pub u: [f32; 2],
    pub v: [f32; 2],
    pub orientations: Vec<Orientation>,
}

impl CategoryRule {
    /// Lower bounds are inclusive and upper bounds exclusive, except at the
    /// frame edge, so rules sharing a boundary split the frame between them.
    pub fn contains(&self, u: f32, v: f32) -> bool {
        within(u, self.u) && within(v, self.v)
    }

    pub fn accepts(&self, orientation: Orientation) -> bool {
        self.orientations.contains(&orientation)
    }
}

fn within(value: f32, [lo, hi]: [f32; 2]) -> bool {
    value >= lo && (value < hi || (hi >= 1.0 && value <= hi))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Strokes with fewer skeleton pixels are discarded as noise.
    pub min_stroke_length: usize,
    pub min_region_overlap: f32,
    /// Axis angles up to this many degrees from horizontal count as horizontal.
    pub horizontal_max_deg: f32,
    /// Axis angles at least this many degrees from horizontal count as vertical.
    pub vertical_min_deg: f32,
    pub rules: Vec<CategoryRule>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        use Orientation::{Diagonal, Horizontal, Vertical};
        let rules = vec![
            CategoryRule {
                kind: LineKind::Heart,
                u: [0.0, 1.0],
                v: [0.0, 0.38],
                orientations: vec![Horizontal],
            },
            CategoryRule {
                kind: LineKind::Head,
                u: [0.0, 1.0],
                v: [0.38, 0.62],
                orientations: vec![Horizontal, Diagonal],
            },
            CategoryRule {
                kind: LineKind::Life,
                u: [0.6, 1.0],
                v: [0.3, 1.0],
                orientations: vec![Diagonal, Vertical],
            },
            CategoryRule {
                kind: LineKind::Fate,
                u: [0.35, 0.6],
                v: [0.3, 1.0],
                orientations: vec![Vertical],
            },
        ];
        Self {
            min_stroke_length: 10,
            min_region_overlap: 0.5,
            horizontal_max_deg: 35.0,
            vertical_min_deg: 55.0,
            rules,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    /// Normalized units spanned by the full width of the mini canonical frame.
    pub units_per_frame: f32,
    pub unit_label: String,
    /// Skeleton step used when estimating turning angles.
    pub curvature_step: usize,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            units_per_frame: 1.0,
            unit_label: "fw".to_string(),
            curvature_step: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub line_thickness: i32,
    pub marker_radius: i32,
    pub label_scale: i32,
    pub draw_labels: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            line_thickness: 2,
            marker_radius: 2,
            label_scale: 1,
            draw_labels: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| PalmError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&contents).map_err(|e| {
            PalmError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PalmError::Config(format!("failed to serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PalmError::Config(msg));

        if self.rectify.canonical_size < 16 {
            return fail(format!(
                "rectify.canonical_size too small: {}",
                self.rectify.canonical_size
            ));
        }
        if self.rectify.template.len() < 4 {
            return fail(format!(
                "rectify.template needs at least 4 points, got {}",
                self.rectify.template.len()
            ));
        }
        if !(0.0..0.25).contains(&self.rectify.crop_margin) {
            return fail(format!(
                "rectify.crop_margin must be in [0, 0.25), got {}",
                self.rectify.crop_margin
            ));
        }
        if self.resize.mini_size == 0 || self.resize.full_size == 0 {
            return fail("resize sizes must be non-zero".to_string());
        }
        if self.segment.input_size == 0 {
            return fail("segment.input_size must be non-zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.segment.threshold) {
            return fail(format!(
                "segment.threshold must be in [0, 1], got {}",
                self.segment.threshold
            ));
        }
        if self.classify.horizontal_max_deg > self.classify.vertical_min_deg {
            return fail(format!(
                "classify.horizontal_max_deg ({}) exceeds vertical_min_deg ({})",
                self.classify.horizontal_max_deg, self.classify.vertical_min_deg
            ));
        }
        for rule in &self.classify.rules {
            if rule.kind == LineKind::Unknown {
                return fail("classify.rules cannot target the unknown category".to_string());
            }
            let ordered = |r: [f32; 2]| r[0] <= r[1] && r[0] >= 0.0 && r[1] <= 1.0;
            if !ordered(rule.u) || !ordered(rule.v) {
                return fail(format!("classify rule for {} has an invalid region", rule.kind));
            }
            if rule.orientations.is_empty() {
                return fail(format!("classify rule for {} accepts no orientation", rule.kind));
            }
        }
        if self.measure.units_per_frame <= 0.0 {
            return fail("measure.units_per_frame must be positive".to_string());
        }
        Ok(())
    }
}
