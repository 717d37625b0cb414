use image::RgbImage;

use super::classify::Classification;
use crate::{
    config::MeasureConfig,
    types::{ClassifiedLine, Measurement, Measurements},
};

pub struct Measurer {
    cfg: MeasureConfig,
}

impl Measurer {
    pub fn new(cfg: MeasureConfig) -> Self {
        Self { cfg }
    }

    /// Measures every classified line against the `mini` canonical frame.
    /// Categories without lines get no entry.
    pub fn measure(&self, classification: &Classification, mini: &RgbImage) -> Measurements {
        let frame = mini.dimensions();
        let mut out = Measurements::new();
        for (kind, lines) in &classification.lines {
            if lines.is_empty() {
                continue;
            }
            let measured: Vec<Measurement> =
                lines.iter().map(|line| self.measure_line(line, frame)).collect();
            for m in &measured {
                log::debug!(
                    "{kind}: {:.3} {} ({:.1} px, straightness {:.2})",
                    m.length,
                    self.cfg.unit_label,
                    m.length_px,
                    m.straightness
                );
            }
            out.insert(*kind, measured);
        }
        out
    }

    pub fn measure_line(&self, line: &ClassifiedLine, frame: (u32, u32)) -> Measurement {
        let points = scaled_points(line, frame);
        let length_px = arc_length(&points);
        let frame_width = frame.0.max(1) as f32;

        let start = points.first().copied().unwrap_or((0.0, 0.0));
        let end = points.last().copied().unwrap_or(start);
        let chord_px = distance(start, end);
        let straightness = if length_px > f32::EPSILON {
            (chord_px / length_px).min(1.0)
        } else {
            1.0
        };

        Measurement {
            length: length_px / frame_width * self.cfg.units_per_frame,
            length_px,
            start,
            end,
            chord_px,
            straightness,
            curvature: mean_curvature(&points, self.cfg.curvature_step, length_px),
        }
    }
}

/// Stroke pixel centres mapped from the mask frame into `frame`.
fn scaled_points(line: &ClassifiedLine, frame: (u32, u32)) -> Vec<(f32, f32)> {
    let stroke = &line.stroke;
    let sx = frame.0 as f32 / stroke.frame.0.max(1) as f32;
    let sy = frame.1 as f32 / stroke.frame.1.max(1) as f32;
    stroke
        .points
        .iter()
        .map(|&(x, y)| ((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy))
        .collect()
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

pub fn arc_length(points: &[(f32, f32)]) -> f32 {
    points.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Total absolute turning angle of the polyline sampled every `step` points,
/// divided by arc length.
fn mean_curvature(points: &[(f32, f32)], step: usize, length_px: f32) -> f32 {
    let step = step.max(1);
    let mut samples: Vec<(f32, f32)> = points.iter().step_by(step).copied().collect();
    if let (Some(&last), Some(&tail)) = (points.last(), samples.last()) {
        if last != tail {
            samples.push(last);
        }
    }
    if samples.len() < 3 || length_px <= f32::EPSILON {
        return 0.0;
    }

    let headings: Vec<f32> = samples
        .windows(2)
        .map(|w| (w[1].1 - w[0].1).atan2(w[1].0 - w[0].0))
        .collect();
    let turning: f32 = headings
        .windows(2)
        .map(|h| {
            let mut d = h[1] - h[0];
            while d > std::f32::consts::PI {
                d -= std::f32::consts::TAU;
            }
            while d < -std::f32::consts::PI {
                d += std::f32::consts::TAU;
            }
            d.abs()
        })
        .sum();
    turning / length_px
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LineKind, Stroke};
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn line(kind: LineKind, points: Vec<(u32, u32)>, frame: u32) -> ClassifiedLine {
        ClassifiedLine {
            kind,
            stroke: Stroke {
                area: points.len(),
                points,
                frame: (frame, frame),
            },
            overlap: 1.0,
        }
    }

    fn classification(lines: Vec<ClassifiedLine>) -> Classification {
        let mut map: BTreeMap<LineKind, Vec<ClassifiedLine>> = BTreeMap::new();
        for l in lines {
            map.entry(l.kind).or_default().push(l);
        }
        Classification {
            stroke_count: map.values().map(Vec::len).sum(),
            lines: map,
        }
    }

    #[test]
    fn straight_line_length_in_frame_units() {
        let measurer = Measurer::new(MeasureConfig::default());
        let heart = line(LineKind::Heart, (0..129).map(|x| (x, 40)).collect(), 256);
        let m = measurer.measure_line(&heart, (256, 256));
        assert_relative_eq!(m.length_px, 128.0, epsilon = 1e-3);
        assert_relative_eq!(m.length, 0.5, epsilon = 1e-5);
        assert_relative_eq!(m.straightness, 1.0, epsilon = 1e-5);
        assert_relative_eq!(m.curvature, 0.0, epsilon = 1e-6);
        assert_eq!(m.start, (0.5, 40.5));
    }

    #[test]
    fn coordinates_scale_to_mini_frame() {
        let measurer = Measurer::new(MeasureConfig::default());
        let heart = line(LineKind::Heart, (0..65).map(|x| (x, 10)).collect(), 128);
        let m = measurer.measure_line(&heart, (256, 256));
        assert_relative_eq!(m.length_px, 128.0, epsilon = 1e-3);
        assert_relative_eq!(m.length, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn single_point_line_has_zero_length() {
        let measurer = Measurer::new(MeasureConfig::default());
        let m = measurer.measure_line(&line(LineKind::Head, vec![(4, 4)], 64), (64, 64));
        assert_eq!(m.length, 0.0);
        assert_eq!(m.straightness, 1.0);
        assert_eq!(m.curvature, 0.0);
    }

    #[test]
    fn bent_line_is_less_straight() {
        let measurer = Measurer::new(MeasureConfig::default());
        let mut pts: Vec<(u32, u32)> = (0..40).map(|x| (x, 10)).collect();
        pts.extend((11..50).map(|y| (39, y)));
        let m = measurer.measure_line(&line(LineKind::Life, pts, 64), (64, 64));
        assert!(m.straightness < 0.8);
        assert!(m.curvature > 0.0);
        assert!(m.length >= 0.0 && m.chord_px >= 0.0);
    }

    #[test]
    fn absent_categories_have_no_entry() {
        let measurer = Measurer::new(MeasureConfig::default());
        let result = measurer.measure(
            &classification(vec![line(LineKind::Heart, (0..30).map(|x| (x, 5)).collect(), 64)]),
            &RgbImage::new(64, 64),
        );
        assert_eq!(result.len(), 1);
        assert!(result.contains_key(&LineKind::Heart));
        assert!(!result.contains_key(&LineKind::Life));

        let empty = measurer.measure(&Classification::default(), &RgbImage::new(64, 64));
        assert!(empty.is_empty());
    }
}
