use fast_image_resize as fir;
use image::RgbImage;

use crate::{
    config::ResizeConfig,
    error::{PalmError, Result},
};

/// Full-resolution and mini copies of the warped palm and its cleaned variant.
#[derive(Clone, Debug)]
pub struct CanonicalSet {
    pub full: RgbImage,
    pub clean: RgbImage,
    pub mini: RgbImage,
    pub clean_mini: RgbImage,
}

pub struct Resizer {
    cfg: ResizeConfig,
    resizer: fir::Resizer,
}

impl Resizer {
    pub fn new(cfg: ResizeConfig) -> Self {
        Self {
            cfg,
            resizer: fir::Resizer::new(),
        }
    }

    pub fn canonical_set(
        &mut self,
        warped: &RgbImage,
        warped_clean: &RgbImage,
    ) -> Result<CanonicalSet> {
        let (full_size, mini_size) = (self.cfg.full_size, self.cfg.mini_size);
        let set = CanonicalSet {
            full: self.resize_square(warped, full_size)?,
            clean: self.resize_square(warped_clean, full_size)?,
            mini: self.resize_square(warped, mini_size)?,
            clean_mini: self.resize_square(warped_clean, mini_size)?,
        };
        log::debug!("canonical set resized to {full_size}px and {mini_size}px");
        Ok(set)
    }

    /// Bilinear resize to `size`×`size`; an image already at that size is copied as is.
    pub fn resize_square(&mut self, image: &RgbImage, size: u32) -> Result<RgbImage> {
        self.resize(image, size, size)
    }

    pub fn resize(&mut self, image: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
        if image.dimensions() == (width, height) {
            return Ok(image.clone());
        }
        if image.width() == 0 || image.height() == 0 || width == 0 || height == 0 {
            return Err(PalmError::Config(format!(
                "cannot resize {}x{} image to {width}x{height}",
                image.width(),
                image.height()
            )));
        }

        let src = fir::images::ImageRef::new(
            image.width(),
            image.height(),
            image.as_raw(),
            fir::PixelType::U8x3,
        )
        .map_err(|err| PalmError::Inference(format!("resize source: {err}")))?;
        let mut dst = fir::images::Image::new(width, height, fir::PixelType::U8x3);
        let options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|err| PalmError::Inference(format!("fast resize failed: {err}")))?;

        RgbImage::from_raw(width, height, dst.into_vec())
            .ok_or_else(|| PalmError::Inference("resized buffer has unexpected length".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 3) as u8, (y * 5) as u8, 77]))
    }

    #[test]
    fn resizing_to_current_size_is_identity() {
        let mut resizer = Resizer::new(ResizeConfig::default());
        let img = gradient(64, 64);
        assert_eq!(resizer.resize_square(&img, 64).unwrap(), img);
    }

    #[test]
    fn canonical_set_has_configured_sizes() {
        let mut resizer = Resizer::new(ResizeConfig {
            full_size: 80,
            mini_size: 20,
        });
        let warped = gradient(80, 80);
        let set = resizer.canonical_set(&warped, &warped).unwrap();
        assert_eq!(set.full, warped);
        assert_eq!(set.mini.dimensions(), (20, 20));
        assert_eq!(set.clean_mini.dimensions(), (20, 20));
    }

    #[test]
    fn uniform_image_stays_uniform() {
        let mut resizer = Resizer::new(ResizeConfig::default());
        let img = RgbImage::from_pixel(50, 30, image::Rgb([10, 200, 30]));
        let out = resizer.resize(&img, 17, 9).unwrap();
        assert!(out.pixels().all(|p| p.0 == [10, 200, 30]));
    }
}
