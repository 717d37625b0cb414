//! Per-request artifact storage.
//!
//! Every request writes its stage outputs into its own directory and every
//! artifact is written at most once, so requests never share files.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use image::{GrayImage, ImageFormat, RgbImage};
use serde::Serialize;

use crate::error::{PalmError, Result};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);
const MAX_CREATE_ATTEMPTS: usize = 16;

/// File locations of every stage output for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub clean: PathBuf,
    pub warped: PathBuf,
    pub warped_clean: PathBuf,
    pub warped_mini: PathBuf,
    pub warped_clean_mini: PathBuf,
    pub palm_lines: PathBuf,
    pub result_image: PathBuf,
    pub result_json: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            clean: dir.join("palm_without_background.png"),
            warped: dir.join("warped_palm.png"),
            warped_clean: dir.join("warped_palm_clean.png"),
            warped_mini: dir.join("warped_palm_mini.png"),
            warped_clean_mini: dir.join("warped_palm_clean_mini.png"),
            palm_lines: dir.join("palm_lines.png"),
            result_image: dir.join("result.png"),
            result_json: dir.join("result.json"),
        }
    }

    pub fn all(&self) -> [&Path; 8] {
        [
            &self.clean,
            &self.warped,
            &self.warped_clean,
            &self.warped_mini,
            &self.warped_clean_mini,
            &self.palm_lines,
            &self.result_image,
            &self.result_json,
        ]
    }
}

#[derive(Clone, Debug)]
pub struct RequestWorkspace {
    root: PathBuf,
    paths: ArtifactPaths,
}

impl RequestWorkspace {
    /// Creates a fresh, uniquely named request directory below `base`.
    pub fn create(base: &Path) -> Result<Self> {
        fs::create_dir_all(base).map_err(|e| PalmError::io(base, e))?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut last_err = None;
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
            let root = base.join(format!("request-{stamp}-{}-{seq}", process::id()));
            match fs::create_dir(&root) {
                Ok(()) => {
                    log::debug!("created request workspace {}", root.display());
                    let paths = ArtifactPaths::in_dir(&root);
                    return Ok(Self { root, paths });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    last_err = Some((root, err));
                }
                Err(err) => return Err(PalmError::io(&root, err)),
            }
        }
        let (root, err) = last_err
            .unwrap_or_else(|| (base.to_path_buf(), std::io::ErrorKind::AlreadyExists.into()));
        Err(PalmError::io(&root, err))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }
}

fn create_new(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| PalmError::io(path, e))?;
    Ok(BufWriter::new(file))
}

pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|e| PalmError::image(path, e))?;
    Ok(image.to_rgb8())
}

pub fn save_rgb(path: &Path, image: &RgbImage) -> Result<()> {
    let format = ImageFormat::from_path(path).map_err(|e| PalmError::image(path, e))?;
    let mut writer = create_new(path)?;
    image
        .write_to(&mut writer, format)
        .map_err(|e| PalmError::image(path, e))?;
    writer.flush().map_err(|e| PalmError::io(path, e))
}

pub fn save_gray(path: &Path, image: &GrayImage) -> Result<()> {
    let format = ImageFormat::from_path(path).map_err(|e| PalmError::image(path, e))?;
    let mut writer = create_new(path)?;
    image
        .write_to(&mut writer, format)
        .map_err(|e| PalmError::image(path, e))?;
    writer.flush().map_err(|e| PalmError::io(path, e))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = create_new(path)?;
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| PalmError::io(path, std::io::Error::other(e)))?;
    writer.flush().map_err(|e| PalmError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_base(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("palm-lines-ws-{tag}-{}", process::id()))
    }

    #[test]
    fn workspaces_never_collide() {
        let base = scratch_base("unique");
        let a = RequestWorkspace::create(&base).unwrap();
        let b = RequestWorkspace::create(&base).unwrap();
        assert_ne!(a.root(), b.root());
        assert_ne!(a.paths().warped, b.paths().warped);
        fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn artifacts_are_write_once() {
        let base = scratch_base("once");
        let ws = RequestWorkspace::create(&base).unwrap();
        let img = RgbImage::new(4, 4);
        save_rgb(&ws.paths().warped, &img).unwrap();
        let err = save_rgb(&ws.paths().warped, &img).unwrap_err();
        assert!(matches!(err, PalmError::Io { .. }));
        fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn saved_png_loads_back_identical() {
        let base = scratch_base("png");
        let ws = RequestWorkspace::create(&base).unwrap();
        let img = RgbImage::from_fn(5, 3, |x, y| image::Rgb([x as u8 * 40, y as u8 * 60, 7]));
        save_rgb(&ws.paths().warped_mini, &img).unwrap();
        let back = load_rgb(&ws.paths().warped_mini).unwrap();
        assert_eq!(back, img);
        fs::remove_dir_all(&base).ok();
    }
}
