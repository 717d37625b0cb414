//! Stroke extraction and palm line categorization.
//!
//! The mask is thinned, split into strokes, and each stroke is matched against
//! the category regions of [`ClassifyConfig`]. A stroke is assigned to the rule
//! that covers the largest share of its skeleton, provided the rule accepts the
//! stroke's orientation.

mod strokes;
mod thinning;

use std::collections::BTreeMap;

use crate::{
    config::{ClassifyConfig, Orientation},
    pipeline::segment::LineMask,
    types::{ClassifiedLine, LineKind, Stroke},
};

pub use strokes::{extract_strokes, label_components};
pub use thinning::thin;

/// Classified lines grouped by category, plus how many strokes survived filtering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    pub lines: BTreeMap<LineKind, Vec<ClassifiedLine>>,
    pub stroke_count: usize,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.lines.values().all(Vec::is_empty)
    }

    pub fn line_count(&self) -> usize {
        self.lines.values().map(Vec::len).sum()
    }

    /// Lines in category order, then stroke start order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedLine> {
        self.lines.values().flatten()
    }

    pub fn get(&self, kind: LineKind) -> &[ClassifiedLine] {
        self.lines.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct Classifier {
    cfg: ClassifyConfig,
}

impl Classifier {
    pub fn new(cfg: ClassifyConfig) -> Self {
        Self { cfg }
    }

    pub fn strokes(&self, mask: &LineMask) -> Vec<Stroke> {
        let skeleton = thin(mask);
        extract_strokes(mask, &skeleton, self.cfg.min_stroke_length)
    }

    pub fn classify(&self, mask: &LineMask) -> Classification {
        let strokes = self.strokes(mask);
        let stroke_count = strokes.len();

        let mut lines: BTreeMap<LineKind, Vec<ClassifiedLine>> = BTreeMap::new();
        for stroke in strokes {
            let (kind, overlap) = self.categorize(&stroke);
            log::debug!(
                "stroke from {:?} ({} px) -> {kind} (overlap {overlap:.2})",
                stroke.start(),
                stroke.len()
            );
            lines.entry(kind).or_default().push(ClassifiedLine {
                kind,
                stroke,
                overlap,
            });
        }
        for group in lines.values_mut() {
            group.sort_by(|a, b| a.stroke.start().cmp(&b.stroke.start()));
        }

        let classification = Classification {
            lines,
            stroke_count,
        };
        log::info!(
            "classified {} of {stroke_count} strokes: {}",
            classification.line_count(),
            classification
                .lines
                .iter()
                .map(|(kind, group)| format!("{kind}={}", group.len()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        classification
    }

    /// Category and winning overlap for one stroke.
    ///
    /// Exact ties between eligible rules, and strokes with no eligible rule,
    /// come out as [`LineKind::Unknown`].
    pub fn categorize(&self, stroke: &Stroke) -> (LineKind, f32) {
        if stroke.is_empty() {
            return (LineKind::Unknown, 0.0);
        }
        let orientation = self.orientation(stroke);
        let total = stroke.len() as f32;

        let mut best: Option<(LineKind, f32)> = None;
        let mut tied = false;
        for rule in &self.cfg.rules {
            if !rule.accepts(orientation) {
                continue;
            }
            let inside = stroke
                .normalized_points()
                .filter(|&(u, v)| rule.contains(u, v))
                .count();
            let overlap = inside as f32 / total;
            if overlap < self.cfg.min_region_overlap {
                continue;
            }
            match best {
                Some((_, current)) if overlap == current => tied = true,
                Some((_, current)) if overlap < current => {}
                _ => {
                    best = Some((rule.kind, overlap));
                    tied = false;
                }
            }
        }

        match best {
            Some((kind, overlap)) if !tied => (kind, overlap),
            Some((_, overlap)) => (LineKind::Unknown, overlap),
            None => (LineKind::Unknown, 0.0),
        }
    }

    pub fn orientation(&self, stroke: &Stroke) -> Orientation {
        let angle = axis_angle_deg(&stroke.points);
        if angle <= self.cfg.horizontal_max_deg {
            Orientation::Horizontal
        } else if angle >= self.cfg.vertical_min_deg {
            Orientation::Vertical
        } else {
            Orientation::Diagonal
        }
    }
}

/// Angle between the principal axis of `points` and the horizontal, in `[0, 90]` degrees.
pub fn axis_angle_deg(points: &[(u32, u32)]) -> f32 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0 as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1 as f64).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    theta.to_degrees().abs() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryRule;

    fn horizontal_band(size: u32, y: u32, x0: u32, x1: u32) -> LineMask {
        let mut mask = LineMask::empty(size, size);
        for yy in y..y + 3 {
            for x in x0..x1 {
                mask.set(x, yy);
            }
        }
        mask
    }

    fn stroke(points: Vec<(u32, u32)>, frame: u32) -> Stroke {
        Stroke {
            area: points.len(),
            points,
            frame: (frame, frame),
        }
    }

    #[test]
    fn upper_horizontal_stroke_is_heart() {
        let mask = horizontal_band(256, 60, 50, 200);
        let result = Classifier::new(ClassifyConfig::default()).classify(&mask);
        assert_eq!(result.stroke_count, 1);
        assert_eq!(result.line_count(), 1);
        assert_eq!(result.get(LineKind::Heart).len(), 1);
        assert_eq!(result.lines.len(), 1);
    }

    #[test]
    fn empty_mask_gives_empty_classification() {
        let result = Classifier::new(ClassifyConfig::default()).classify(&LineMask::empty(64, 64));
        assert!(result.is_empty());
        assert_eq!(result.stroke_count, 0);
        assert!(result.lines.is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let mut mask = horizontal_band(256, 60, 50, 200);
        for y in 120..230 {
            mask.set(100, y);
            mask.set(101, y);
        }
        let classifier = Classifier::new(ClassifyConfig::default());
        let a = classifier.classify(&mask);
        let b = classifier.classify(&mask);
        assert_eq!(a, b);
        assert!(a.line_count() <= a.stroke_count);
        assert_eq!(a.get(LineKind::Fate).len(), 1);
    }

    #[test]
    fn central_vertical_line_is_fate() {
        let mut mask = LineMask::empty(256, 256);
        for y in 90..230 {
            mask.set(140, y);
            mask.set(141, y);
        }
        let result = Classifier::new(ClassifyConfig::default()).classify(&mask);
        let kinds: Vec<LineKind> = result.iter().map(|line| line.kind).collect();
        assert_eq!(kinds, vec![LineKind::Fate]);
    }

    #[test]
    fn orientation_classes() {
        let classifier = Classifier::new(ClassifyConfig::default());
        let flat = stroke((0..40).map(|x| (x, 10)).collect(), 64);
        let steep = stroke((0..40).map(|y| (10, y)).collect(), 64);
        let diag = stroke((0..40).map(|i| (i, i)).collect(), 64);
        assert_eq!(classifier.orientation(&flat), Orientation::Horizontal);
        assert_eq!(classifier.orientation(&steep), Orientation::Vertical);
        assert_eq!(classifier.orientation(&diag), Orientation::Diagonal);
    }

    #[test]
    fn exact_tie_is_unknown() {
        let cfg = ClassifyConfig {
            rules: vec![
                CategoryRule {
                    kind: LineKind::Heart,
                    u: [0.0, 1.0],
                    v: [0.0, 0.5],
                    orientations: vec![Orientation::Horizontal],
                },
                CategoryRule {
                    kind: LineKind::Head,
                    u: [0.0, 1.0],
                    v: [0.0, 0.5],
                    orientations: vec![Orientation::Horizontal],
                },
            ],
            ..ClassifyConfig::default()
        };
        let s = stroke((5..60).map(|x| (x, 10)).collect(), 64);
        assert_eq!(Classifier::new(cfg).categorize(&s).0, LineKind::Unknown);
    }

    #[test]
    fn wrong_orientation_is_not_eligible() {
        // Vertical stroke in the heart band only.
        let s = stroke((2..40).map(|y| (30, y)).collect(), 256);
        let (kind, overlap) = Classifier::new(ClassifyConfig::default()).categorize(&s);
        assert_eq!(kind, LineKind::Unknown);
        assert_eq!(overlap, 0.0);
    }
}
