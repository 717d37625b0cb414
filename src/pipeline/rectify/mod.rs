//! Projective rectification of the palm into the canonical frame.

pub mod homography;
mod warp;

use image::RgbImage;
use nalgebra::Matrix3;

use crate::{
    config::RectifyConfig,
    error::{PalmError, Result},
    types::{HAND_LANDMARKS, HandLandmarks},
};

pub use homography::{Homography, HomographyError, point_spread};
pub use warp::warp_perspective;

/// Canonical palm image plus the transform that produced it.
#[derive(Clone, Debug)]
pub struct Rectified {
    pub image: RgbImage,
    /// Original image pixels to canonical image pixels.
    pub transform: Homography,
}

pub struct Rectifier {
    cfg: RectifyConfig,
}

impl Rectifier {
    pub fn new(cfg: RectifyConfig) -> Self {
        Self { cfg }
    }

    /// Canonical target points in pixels, before the border crop.
    fn template_pixels(&self) -> Vec<[f64; 2]> {
        let size = self.cfg.canonical_size as f64;
        self.cfg
            .template
            .iter()
            .map(|t| [t.x as f64 * size, t.y as f64 * size])
            .collect()
    }

    /// Zoom that trims `crop_margin` of the frame from every side.
    fn crop_transform(&self) -> Result<Homography> {
        let size = self.cfg.canonical_size as f64;
        let margin = self.cfg.crop_margin as f64 * size;
        let scale = size / (size - 2.0 * margin);
        #[rustfmt::skip]
        let m = Matrix3::new(
            scale, 0.0, -margin * scale,
            0.0, scale, -margin * scale,
            0.0, 0.0, 1.0,
        );
        Homography::from_matrix(m).ok_or_else(|| {
            PalmError::Config(format!("invalid crop margin {}", self.cfg.crop_margin))
        })
    }

    /// Solves the original-to-canonical transform for a landmark set.
    pub fn solve(&self, landmarks: &HandLandmarks) -> Result<Homography> {
        if landmarks.len() < HAND_LANDMARKS {
            return Err(PalmError::rectification(format!(
                "found {} hand landmarks, need {HAND_LANDMARKS}",
                landmarks.len()
            )));
        }
        if landmarks.confidence < self.cfg.min_confidence {
            return Err(PalmError::rectification(format!(
                "hand landmark confidence {:.3} below {:.3}",
                landmarks.confidence, self.cfg.min_confidence
            )));
        }

        let mut src = Vec::with_capacity(self.cfg.template.len());
        for target in &self.cfg.template {
            let (x, y) = landmarks.get(target.keypoint).ok_or_else(|| {
                PalmError::rectification(format!("missing hand keypoint {}", target.keypoint))
            })?;
            if !x.is_finite() || !y.is_finite() {
                return Err(PalmError::rectification(format!(
                    "hand keypoint {} is not finite",
                    target.keypoint
                )));
            }
            src.push([x as f64, y as f64]);
        }

        let spread = point_spread(&src);
        if spread < self.cfg.min_landmark_spread as f64 {
            return Err(PalmError::rectification(format!(
                "palm landmarks are nearly collinear (spread {spread:.4})"
            )));
        }

        let dst = self.template_pixels();
        let fitted = Homography::estimate(&src, &dst, self.cfg.min_transform_conditioning)
            .map_err(|err| PalmError::rectification(err.to_string()))?;
        let transform = fitted.then(&self.crop_transform()?);

        self.check_frame(&transform)?;
        Ok(transform)
    }

    /// The whole canonical frame must come from one side of the vanishing line,
    /// otherwise the warp would fold the image over itself.
    fn check_frame(&self, transform: &Homography) -> Result<()> {
        let size = self.cfg.canonical_size as f64;
        let corners = [[0.0, 0.0], [size, 0.0], [size, size], [0.0, size]];
        let weights: Vec<f64> = corners
            .iter()
            .map(|c| transform.inverse_weight(c[0], c[1]))
            .collect();
        let consistent = weights.iter().all(|&w| w > 1e-12) || weights.iter().all(|&w| w < -1e-12);
        let finite = corners
            .iter()
            .all(|c| transform.apply_inverse(c[0], c[1]).is_some());
        if !consistent || !finite {
            return Err(PalmError::rectification(
                "canonical frame does not map to a finite quadrilateral",
            ));
        }
        Ok(())
    }

    /// Warps `image` into the canonical frame using the hand `landmarks`.
    pub fn rectify(&self, image: &RgbImage, landmarks: &HandLandmarks) -> Result<Rectified> {
        let transform = self.solve(landmarks)?;
        let size = self.cfg.canonical_size;
        let (warped, filled) = warp_perspective(image, &transform, size, self.cfg.fill);

        let total = (size as usize) * (size as usize);
        log::info!(
            "rectified {}x{} image into {size}x{size} canonical frame ({:.1}% outside source)",
            image.width(),
            image.height(),
            100.0 * filled as f64 / total as f64
        );
        if filled == total {
            return Err(PalmError::rectification(
                "canonical frame lies entirely outside the photo",
            ));
        }

        Ok(Rectified {
            image: warped,
            transform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Landmarks of a hand photographed under `view` (canonical to photo).
    fn photographed_hand(cfg: &RectifyConfig, view: &Homography) -> HandLandmarks {
        let size = cfg.canonical_size as f64;
        let mut points = vec![(0.0f32, 0.0f32); HAND_LANDMARKS];
        for (i, p) in points.iter_mut().enumerate() {
            let [x, y] = view.apply(size * 0.3 + i as f64, size * 0.4).unwrap();
            *p = (x as f32, y as f32);
        }
        for t in &cfg.template {
            let [x, y] = view.apply(t.x as f64 * size, t.y as f64 * size).unwrap();
            points[t.keypoint] = (x as f32, y as f32);
        }
        HandLandmarks::new(points, 0.9)
    }

    #[rustfmt::skip]
    fn camera_view() -> Homography {
        Homography::from_matrix(Matrix3::new(
            0.6, 0.08, 140.0,
            -0.05, 0.55, 90.0,
            0.00006, 0.00003, 1.0,
        ))
        .unwrap()
    }

    fn small_config() -> RectifyConfig {
        RectifyConfig {
            canonical_size: 128,
            crop_margin: 0.0,
            ..RectifyConfig::default()
        }
    }

    #[test]
    fn inverse_maps_canonical_corners_onto_photo_quad() {
        let cfg = small_config();
        let view = camera_view();
        let rectifier = Rectifier::new(cfg.clone());
        let transform = rectifier.solve(&photographed_hand(&cfg, &view)).unwrap();

        let size = cfg.canonical_size as f64;
        for c in [[0.0, 0.0], [size, 0.0], [size, size], [0.0, size]] {
            let photo = transform.apply_inverse(c[0], c[1]).unwrap();
            let expected = view.apply(c[0], c[1]).unwrap();
            assert_relative_eq!(photo[0], expected[0], epsilon = 1e-2);
            assert_relative_eq!(photo[1], expected[1], epsilon = 1e-2);

            let back = transform.apply(photo[0], photo[1]).unwrap();
            assert_relative_eq!(back[0], c[0], epsilon = 1e-6);
            assert_relative_eq!(back[1], c[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn solve_is_bit_stable() {
        let cfg = small_config();
        let rectifier = Rectifier::new(cfg.clone());
        let hand = photographed_hand(&cfg, &camera_view());
        let a = rectifier.solve(&hand).unwrap();
        let b = rectifier.solve(&hand).unwrap();
        assert_eq!(a.matrix(), b.matrix());
    }

    #[test]
    fn too_few_landmarks_fail() {
        let rectifier = Rectifier::new(small_config());
        let hand = HandLandmarks::new(vec![(10.0, 10.0); 5], 0.9);
        assert!(matches!(
            rectifier.solve(&hand),
            Err(PalmError::RectificationFailed { .. })
        ));
    }

    #[test]
    fn low_confidence_fails() {
        let cfg = small_config();
        let rectifier = Rectifier::new(cfg.clone());
        let mut hand = photographed_hand(&cfg, &camera_view());
        hand.confidence = 0.1;
        assert!(matches!(
            rectifier.solve(&hand),
            Err(PalmError::RectificationFailed { .. })
        ));
    }

    #[test]
    fn collinear_landmarks_fail() {
        let rectifier = Rectifier::new(small_config());
        let points = (0..HAND_LANDMARKS)
            .map(|i| (10.0 + i as f32 * 3.0, 20.0 + i as f32 * 3.0))
            .collect();
        let err = rectifier
            .solve(&HandLandmarks::new(points, 0.95))
            .unwrap_err();
        assert!(err.to_string().contains("collinear"));
    }

    #[test]
    fn rectify_warps_to_canonical_size() {
        let cfg = small_config();
        let view = camera_view();
        let photo = RgbImage::from_pixel(320, 240, image::Rgb([180, 140, 120]));
        let rectifier = Rectifier::new(cfg.clone());
        let out = rectifier
            .rectify(&photo, &photographed_hand(&cfg, &view))
            .unwrap();
        assert_eq!(out.image.dimensions(), (128, 128));
        assert_eq!(out.image.get_pixel(64, 64), &image::Rgb([180, 140, 120]));
    }
}
