//! Annotated result image and textual summary.

mod draw;

use std::fmt::Write as _;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::classify::Classification;
use crate::{
    config::RenderConfig,
    types::{LineKind, Measurement, Measurements},
};

pub use draw::{draw_circle, draw_line, draw_polyline, draw_text, text_size};

/// Serializable per-request summary: measurements grouped by category.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub unit: String,
    pub stroke_count: usize,
    pub lines: Measurements,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.lines.values().all(Vec::is_empty)
    }

    pub fn line_count(&self) -> usize {
        self.lines.values().map(Vec::len).sum()
    }

    pub fn to_text(&self) -> String {
        if self.is_empty() {
            return "no principal lines detected".to_string();
        }
        let mut text = String::new();
        for (kind, measurements) in &self.lines {
            for m in measurements {
                let _ = writeln!(
                    text,
                    "{}: {:.3} {} ({:.1} px, straightness {:.2})",
                    kind.display_name(),
                    m.length,
                    self.unit,
                    m.length_px,
                    m.straightness
                );
            }
        }
        text.trim_end().to_string()
    }
}

#[derive(Clone, Debug)]
pub struct Rendered {
    pub image: RgbImage,
    pub summary: Summary,
}

pub struct Renderer {
    cfg: RenderConfig,
    unit: String,
}

impl Renderer {
    pub fn new(cfg: RenderConfig, unit: impl Into<String>) -> Self {
        Self {
            cfg,
            unit: unit.into(),
        }
    }

    /// Draws every measured line onto a copy of `mini`. `mini` itself is untouched,
    /// and with no lines the copy is pixel-identical to it.
    pub fn render(
        &self,
        mini: &RgbImage,
        classification: &Classification,
        measurements: &Measurements,
    ) -> Rendered {
        let mut canvas = mini.clone();
        let frame = mini.dimensions();

        for (kind, lines) in &classification.lines {
            let color = kind.color();
            for line in lines {
                let stroke = &line.stroke;
                let sx = frame.0 as f32 / stroke.frame.0.max(1) as f32;
                let sy = frame.1 as f32 / stroke.frame.1.max(1) as f32;
                let points: Vec<(f32, f32)> = stroke
                    .points
                    .iter()
                    .map(|&(x, y)| ((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy))
                    .collect();
                draw_polyline(&mut canvas, &points, color, self.cfg.line_thickness);
            }
        }

        // Markers and labels go on top of every line.
        for (kind, measured) in measurements {
            for m in measured {
                self.draw_markers(&mut canvas, *kind, m);
            }
        }

        let summary = Summary {
            unit: self.unit.clone(),
            stroke_count: classification.stroke_count,
            lines: measurements.clone(),
        };
        log::debug!("rendered {} lines", summary.line_count());
        Rendered {
            image: canvas,
            summary,
        }
    }

    fn draw_markers(&self, canvas: &mut RgbImage, kind: LineKind, m: &Measurement) {
        let color = kind.color();
        let radius = self.cfg.marker_radius;
        for p in [m.start, m.end] {
            draw_circle(canvas, (p.0 as i32, p.1 as i32), radius, color);
        }
        if !self.cfg.draw_labels {
            return;
        }

        let label = format!("{} {:.2}", kind.tag(), m.length);
        let scale = self.cfg.label_scale.max(1);
        let (tw, th) = text_size(&label, scale);
        let (w, h) = (canvas.width() as i32, canvas.height() as i32);
        let gap = radius + 2;
        let x = (m.start.0 as i32 + gap).clamp(0, (w - tw).max(0));
        let above = m.start.1 as i32 - gap - th;
        let y = if above >= 0 {
            above
        } else {
            (m.start.1 as i32 + gap).min((h - th).max(0))
        };
        draw_text(canvas, x, y, &label, scale, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassifiedLine, Stroke};
    use std::collections::BTreeMap;

    fn heart_fixture(frame: u32) -> (Classification, Measurements) {
        let line = ClassifiedLine {
            kind: LineKind::Heart,
            stroke: Stroke {
                points: (20..100).map(|x| (x, 30)).collect(),
                area: 80,
                frame: (frame, frame),
            },
            overlap: 1.0,
        };
        let mut lines = BTreeMap::new();
        lines.insert(LineKind::Heart, vec![line]);
        let classification = Classification {
            lines,
            stroke_count: 1,
        };
        let mut measurements = Measurements::new();
        measurements.insert(
            LineKind::Heart,
            vec![Measurement {
                length: 0.62,
                length_px: 79.0,
                start: (20.5, 30.5),
                end: (99.5, 30.5),
                chord_px: 79.0,
                straightness: 1.0,
                curvature: 0.0,
            }],
        );
        (classification, measurements)
    }

    #[test]
    fn empty_result_leaves_image_identical() {
        let mini = RgbImage::from_fn(64, 64, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let renderer = Renderer::new(RenderConfig::default(), "fw");
        let out = renderer.render(&mini, &Classification::default(), &Measurements::new());
        assert_eq!(out.image, mini);
        assert!(out.summary.is_empty());
        assert_eq!(out.summary.to_text(), "no principal lines detected");
    }

    #[test]
    fn lines_are_drawn_in_category_color() {
        let mini = RgbImage::new(128, 128);
        let (classification, measurements) = heart_fixture(128);
        let renderer = Renderer::new(RenderConfig::default(), "fw");
        let out = renderer.render(&mini, &classification, &measurements);
        assert_eq!(out.image.get_pixel(60, 30).0, LineKind::Heart.color());
        assert_eq!(mini.get_pixel(60, 30).0, [0, 0, 0]);
        assert_eq!(out.summary.line_count(), 1);
        assert!(out.summary.to_text().starts_with("Heart line: 0.620 fw"));
    }

    #[test]
    fn summary_serializes_by_category() {
        let (classification, measurements) = heart_fixture(128);
        let renderer = Renderer::new(RenderConfig::default(), "fw");
        let out = renderer.render(&RgbImage::new(128, 128), &classification, &measurements);
        let json = serde_json::to_value(&out.summary).unwrap();
        assert_eq!(json["lines"]["heart"][0]["length"].as_f64().map(|v| v as f32), Some(0.62));
        assert_eq!(json["stroke_count"], 1);
    }
}
