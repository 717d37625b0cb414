use image::RgbImage;
use rayon::prelude::*;

use super::homography::Homography;

/// Resamples `src` into a `size`×`size` frame where output pixel `p` takes the
/// bilinear sample at `H⁻¹(p)`. Pixels whose source lies outside `src` get `fill`.
///
/// Returns the image and the number of filled pixels.
pub fn warp_perspective(
    src: &RgbImage,
    homography: &Homography,
    size: u32,
    fill: [u8; 3],
) -> (RgbImage, usize) {
    let stride = size as usize * 3;
    let mut buffer = vec![0u8; stride * size as usize];

    let filled: usize = buffer
        .par_chunks_mut(stride)
        .enumerate()
        .map(|(y, row)| {
            let mut filled = 0usize;
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let sample = homography
                    .apply_inverse(x as f64 + 0.5, y as f64 + 0.5)
                    .and_then(|[sx, sy]| sample_bilinear(src, sx - 0.5, sy - 0.5, fill));
                match sample {
                    Some(rgb) => px.copy_from_slice(&rgb),
                    None => {
                        px.copy_from_slice(&fill);
                        filled += 1;
                    }
                }
            }
            filled
        })
        .sum();

    let image = RgbImage::from_raw(size, size, buffer)
        .unwrap_or_else(|| RgbImage::from_pixel(size, size, image::Rgb(fill)));
    (image, filled)
}

/// Bilinear sample at continuous pixel coordinates; `None` when the point is
/// more than half a pixel outside the image. Taps beyond the edge read `fill`.
fn sample_bilinear(src: &RgbImage, x: f64, y: f64, fill: [u8; 3]) -> Option<[u8; 3]> {
    let (w, h) = (src.width() as f64, src.height() as f64);
    if !(x >= -0.5 && y >= -0.5 && x <= w - 0.5 && y <= h - 0.5) {
        return None;
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let fetch = |cx: f64, cy: f64| -> [f64; 3] {
        if cx < 0.0 || cy < 0.0 || cx >= w || cy >= h {
            return fill.map(f64::from);
        }
        src.get_pixel(cx as u32, cy as u32).0.map(f64::from)
    };

    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

    Some(std::array::from_fn(|c| {
        lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy)
            .round()
            .clamp(0.0, 255.0) as u8
    }))
}
