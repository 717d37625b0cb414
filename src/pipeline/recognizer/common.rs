use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::RgbImage;
use ndarray::Array4;
use rayon::prelude::*;

pub const INPUT_SIZE: u32 = 224;
pub const NUM_LANDMARKS: usize = 21;
pub const PALM_INPUT_SIZE: u32 = 192;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Square crop of the source image, rotated by `angle` around `center`.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
}

/// Letterboxes `image` into a `target_size` square NHWC tensor scaled to `[0, 1]`.
pub fn prepare_frame_with_size(
    image: &RgbImage,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot prepare an empty {width}x{height} image"));
    }

    let scale = target_size as f32 / (width.max(height) as f32);
    let new_w = (width as f32 * scale).round().clamp(1.0, target_size as f32) as u32;
    let new_h = (height as f32 * scale).round().clamp(1.0, target_size as f32) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        width,
        height,
        image.as_raw().clone(),
        fir::PixelType::U8x3,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 3];
    let dst_stride = target_size as usize * 3;
    let src_stride = new_w as usize * 3;
    for (row, src_row) in resized.chunks_exact(src_stride).enumerate() {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 3;
        canvas[dst_offset..dst_offset + src_stride].copy_from_slice(src_row);
    }

    let normalized: Vec<f32> = canvas.par_iter().map(|&v| v as f32 / 255.0).collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: width,
        orig_h: height,
    };

    Ok((input, letterbox))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

/// Samples a rotated square crop into an NHWC tensor for the landmark estimator.
pub fn prepare_rotated_crop(
    image: &RgbImage,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
    };

    let size = output_size as usize;
    let mut data = vec![0.0f32; size * size * 3];
    data.par_chunks_mut(size * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let (sx, sy) = transform.project(x as f32 + 0.5, y as f32 + 0.5);
                px.copy_from_slice(&sample_rgb(image, sx, sy));
            }
        });

    let array = Array4::<f32>::from_shape_vec((1, size, size, 3), data)
        .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;

    Ok((array, transform))
}

impl CropTransform {
    /// Maps a crop pixel coordinate back into the source image. Not clamped:
    /// keypoints slightly outside the photo still constrain the rectifying warp.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        (
            self.center.0 + dx * cos - dy * sin,
            self.center.1 + dx * sin + dy * cos,
        )
    }
}

pub fn project_landmarks_with_transform(
    landmarks: &[[f32; 3]],
    transform: &CropTransform,
) -> Vec<(f32, f32)> {
    landmarks
        .iter()
        .map(|[x, y, _z]| transform.project(*x, *y))
        .collect()
}

fn sample_rgb(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0.0; 3];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let (w, h) = (image.width() as i64, image.height() as i64);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let (ix, iy) = (cx as i64, cy as i64);
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0; 3];
        }
        let px = image.get_pixel(ix as u32, iy as u32);
        [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
