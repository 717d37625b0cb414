use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    HandposeEstimator,
    PalmDetector,
    LineSegmenter,
}

const MODEL_DIR: &str = "models";
const HANDPOSE_ESTIMATOR_MODEL_FILENAME: &str = "handpose_estimation_mediapipe_2023feb.onnx";
const HANDPOSE_ESTIMATOR_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx";
const PALM_DETECTOR_MODEL_FILENAME: &str = "palm_detection_mediapipe_2023feb.onnx";
const PALM_DETECTOR_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx";
const LINE_SEGMENTER_MODEL_FILENAME: &str = "palm_lines_unet.onnx";

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::HandposeEstimator => "handpose estimator",
            ModelKind::PalmDetector => "palm detector",
            ModelKind::LineSegmenter => "palm line segmenter",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            ModelKind::HandposeEstimator => HANDPOSE_ESTIMATOR_MODEL_FILENAME,
            ModelKind::PalmDetector => PALM_DETECTOR_MODEL_FILENAME,
            ModelKind::LineSegmenter => LINE_SEGMENTER_MODEL_FILENAME,
        }
    }

    /// The segmentation checkpoint is trained in-house and has no public mirror.
    fn download_url(&self) -> Option<&'static str> {
        match self {
            ModelKind::HandposeEstimator => Some(HANDPOSE_ESTIMATOR_MODEL_URL),
            ModelKind::PalmDetector => Some(PALM_DETECTOR_MODEL_URL),
            ModelKind::LineSegmenter => None,
        }
    }

    pub fn default_path(&self) -> PathBuf {
        PathBuf::from(MODEL_DIR).join(self.file_name())
    }
}

pub fn default_handpose_estimator_model_path() -> PathBuf {
    ModelKind::HandposeEstimator.default_path()
}

pub fn default_palm_detector_model_path() -> PathBuf {
    ModelKind::PalmDetector.default_path()
}

pub fn default_line_segmenter_model_path() -> PathBuf {
    ModelKind::LineSegmenter.default_path()
}

#[derive(Clone, Debug)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

/// Makes sure `model_path` holds the checkpoint for `model`, downloading it when a
/// public source exists.
pub fn ensure_model_ready<F>(
    model: ModelKind,
    model_path: &Path,
    mut on_event: F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent { model });
        on_event(ModelDownloadEvent::Finished { model });
        return Ok(());
    }

    let Some(url) = model.download_url() else {
        return Err(anyhow!(
            "{} model not found at {} and no download source is known",
            model.label(),
            model_path.display()
        ));
    };

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create {} model directory {}",
                model.label(),
                parent.display()
            )
        })?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(model, url, model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", model.label()));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
    .with_context(|| {
        format!(
            "failed to download {} model to {}",
            model.label(),
            model_path.display()
        )
    })
}

fn download_to_path<F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started {
        model,
        total: total_size,
    });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            model,
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} downloading model")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_models() {
        for kind in [
            ModelKind::HandposeEstimator,
            ModelKind::PalmDetector,
            ModelKind::LineSegmenter,
        ] {
            assert!(kind.default_path().starts_with(MODEL_DIR));
        }
    }

    #[test]
    fn missing_segmenter_has_no_download_source() {
        let path = std::env::temp_dir().join("palm-lines-no-such-dir/palm_lines_unet.onnx");
        let mut events = Vec::new();
        let err = ensure_model_ready(ModelKind::LineSegmenter, &path, |evt| events.push(evt))
            .unwrap_err();
        assert!(err.to_string().contains("no download source"));
        assert!(events.is_empty());
    }

    #[test]
    fn present_model_reports_without_download() {
        let path = std::env::temp_dir().join(format!(
            "palm-lines-present-{}.onnx",
            std::process::id()
        ));
        fs::write(&path, b"stub").unwrap();
        let mut events = Vec::new();
        ensure_model_ready(ModelKind::LineSegmenter, &path, |evt| events.push(evt)).unwrap();
        fs::remove_file(&path).ok();
        assert!(matches!(
            events.as_slice(),
            [
                ModelDownloadEvent::AlreadyPresent { .. },
                ModelDownloadEvent::Finished { .. }
            ]
        ));
    }
}
