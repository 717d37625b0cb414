use std::collections::VecDeque;

use image::{Rgb, RgbImage};

use crate::{config::BackgroundConfig, error::Result};

/// Strips the scene around the hand, leaving it on a neutral field.
pub trait BackgroundRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage>;
}

impl<R: BackgroundRemover + ?Sized> BackgroundRemover for Box<R> {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        (**self).remove_background(image)
    }
}

/// Returns the input unchanged, for inputs that were already cleaned upstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepBackground;

impl BackgroundRemover for KeepBackground {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        Ok(image.clone())
    }
}

/// Flood-fills the border-connected region whose color is close to the median
/// border color. Works for hands photographed against a plain backdrop.
#[derive(Clone, Debug)]
pub struct FlatFieldRemover {
    tolerance: f32,
    neutral: [u8; 3],
}

impl FlatFieldRemover {
    pub fn new(cfg: &BackgroundConfig) -> Self {
        Self {
            tolerance: cfg.tolerance,
            neutral: cfg.neutral,
        }
    }
}

impl Default for FlatFieldRemover {
    fn default() -> Self {
        Self::new(&BackgroundConfig::default())
    }
}

impl BackgroundRemover for FlatFieldRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        let (w, h) = image.dimensions();
        let mut out = image.clone();
        if w == 0 || h == 0 {
            return Ok(out);
        }

        let border = border_coords(w, h);
        let background = median_color(image, &border);
        let tol_sq = self.tolerance * self.tolerance;
        let is_background = |px: &Rgb<u8>| color_dist_sq(px.0, background) <= tol_sq;

        let mut visited = vec![false; (w as usize) * (h as usize)];
        let mut queue = VecDeque::new();
        for &(x, y) in &border {
            let idx = (y * w + x) as usize;
            if !visited[idx] && is_background(image.get_pixel(x, y)) {
                visited[idx] = true;
                queue.push_back((x, y));
            }
        }

        let mut cleared = 0usize;
        while let Some((x, y)) = queue.pop_front() {
            out.put_pixel(x, y, Rgb(self.neutral));
            cleared += 1;
            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbors {
                if nx >= w || ny >= h {
                    continue;
                }
                let idx = (ny * w + nx) as usize;
                if !visited[idx] && is_background(image.get_pixel(nx, ny)) {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        log::debug!(
            "background removal cleared {cleared} of {} pixels (border color {:?})",
            w * h,
            background
        );
        Ok(out)
    }
}

fn border_coords(w: u32, h: u32) -> Vec<(u32, u32)> {
    let mut coords = Vec::with_capacity(2 * (w + h) as usize);
    for x in 0..w {
        coords.push((x, 0));
        if h > 1 {
            coords.push((x, h - 1));
        }
    }
    for y in 1..h.saturating_sub(1) {
        coords.push((0, y));
        if w > 1 {
            coords.push((w - 1, y));
        }
    }
    coords
}

fn median_color(image: &RgbImage, coords: &[(u32, u32)]) -> [u8; 3] {
    let mut channels: [Vec<u8>; 3] = Default::default();
    for &(x, y) in coords {
        let px = image.get_pixel(x, y);
        for c in 0..3 {
            channels[c].push(px[c]);
        }
    }
    let mut median = [0u8; 3];
    for c in 0..3 {
        channels[c].sort_unstable();
        median[c] = channels[c].get(channels[c].len() / 2).copied().unwrap_or(0);
    }
    median
}

fn color_dist_sq(a: [u8; 3], b: [u8; 3]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&p, &q)| {
            let d = p as f32 - q as f32;
            d * d
        })
        .sum()
}
