use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Number of keypoints produced by the hand landmark estimator.
pub const HAND_LANDMARKS: usize = 21;

/// MediaPipe hand keypoint indices.
pub mod keypoint {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const INDEX_MCP: usize = 5;
    pub const MIDDLE_MCP: usize = 9;
    pub const RING_MCP: usize = 13;
    pub const PINKY_MCP: usize = 17;
}

#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}

/// Hand keypoints in original image coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandLandmarks {
    pub points: Vec<(f32, f32)>,
    pub confidence: f32,
}

impl HandLandmarks {
    pub fn new(points: Vec<(f32, f32)>, confidence: f32) -> Self {
        Self { points, confidence }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<(f32, f32)> {
        self.points.get(idx).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Heart,
    Head,
    Life,
    Fate,
    Unknown,
}

impl LineKind {
    pub const ALL: [LineKind; 5] = [
        LineKind::Heart,
        LineKind::Head,
        LineKind::Life,
        LineKind::Fate,
        LineKind::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LineKind::Heart => "heart",
            LineKind::Head => "head",
            LineKind::Life => "life",
            LineKind::Fate => "fate",
            LineKind::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LineKind::Heart => "Heart line",
            LineKind::Head => "Head line",
            LineKind::Life => "Life line",
            LineKind::Fate => "Fate line",
            LineKind::Unknown => "Unclassified line",
        }
    }

    /// Short uppercase tag drawn next to the line in the annotated image.
    pub fn tag(&self) -> &'static str {
        match self {
            LineKind::Heart => "HEART",
            LineKind::Head => "HEAD",
            LineKind::Life => "LIFE",
            LineKind::Fate => "FATE",
            LineKind::Unknown => "?",
        }
    }

    pub fn color(&self) -> [u8; 3] {
        match self {
            LineKind::Heart => [239, 68, 68],
            LineKind::Head => [59, 130, 246],
            LineKind::Life => [34, 197, 94],
            LineKind::Fate => [234, 179, 8],
            LineKind::Unknown => [156, 163, 175],
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A connected line component reduced to its ordered centerline.
#[derive(Clone, Debug, PartialEq)]
pub struct Stroke {
    /// Skeleton pixels `(x, y)` ordered from one end of the stroke to the other.
    pub points: Vec<(u32, u32)>,
    /// Number of mask pixels in the component before thinning.
    pub area: usize,
    /// Width and height of the mask the stroke was extracted from.
    pub frame: (u32, u32),
}

impl Stroke {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> Option<(u32, u32)> {
        self.points.first().copied()
    }

    pub fn end(&self) -> Option<(u32, u32)> {
        self.points.last().copied()
    }

    /// Skeleton points in normalized frame coordinates, both axes in `[0, 1]`.
    pub fn normalized_points(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        let (w, h) = (self.frame.0.max(1) as f32, self.frame.1.max(1) as f32);
        self.points
            .iter()
            .map(move |&(x, y)| ((x as f32 + 0.5) / w, (y as f32 + 0.5) / h))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedLine {
    pub kind: LineKind,
    pub stroke: Stroke,
    /// Fraction of skeleton points inside the winning category region.
    pub overlap: f32,
}

/// Geometric description of one classified line, in mini canonical coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Arc length in normalized units.
    pub length: f32,
    pub length_px: f32,
    pub start: (f32, f32),
    pub end: (f32, f32),
    pub chord_px: f32,
    /// Chord over arc length, 1.0 for a straight line.
    pub straightness: f32,
    /// Mean absolute turning angle per pixel of arc length, in radians.
    pub curvature: f32,
}

pub type Measurements = BTreeMap<LineKind, Vec<Measurement>>;
