//! Error types for the palm analysis pipeline.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PalmError>;

#[derive(Error, Debug)]
pub enum PalmError {
    /// No reliable hand geometry could be established for this image.
    #[error("rectification failed: {reason}")]
    RectificationFailed { reason: String },

    /// A model checkpoint could not be loaded. Fatal for the process.
    #[error("failed to load model from {}: {message}", path.display())]
    ModelLoad { path: PathBuf, message: String },

    /// Model tensors do not have the configured shape. Fatal configuration error.
    #[error("segmentation shape mismatch: expected {expected:?}, got {actual:?}")]
    SegmentationShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PalmError {
    pub fn rectification(reason: impl Into<String>) -> Self {
        Self::RectificationFailed {
            reason: reason.into(),
        }
    }

    pub fn model_load(path: &Path, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn image(path: &Path, source: image::ImageError) -> Self {
        Self::Image {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when a fresh image from the user may succeed; false for process-level faults.
    pub fn is_request_recoverable(&self) -> bool {
        matches!(self, PalmError::RectificationFailed { .. })
    }

    /// True for errors that invalidate the whole process rather than one request.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            PalmError::ModelLoad { .. }
                | PalmError::SegmentationShapeMismatch { .. }
                | PalmError::Config(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            PalmError::RectificationFailed { .. } => {
                "Could not find a clear, open palm in the photo. Please retake it with the whole hand visible, fingers spread and palm facing the camera.".to_string()
            }
            PalmError::Io { .. } | PalmError::Image { .. } => {
                "Could not read or write an image file. Please check the file and try again."
                    .to_string()
            }
            _ => "Palm analysis is not available right now because of a configuration problem."
                .to_string(),
        }
    }
}

impl From<ort::Error> for PalmError {
    fn from(err: ort::Error) -> Self {
        PalmError::Inference(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rectification_is_recoverable() {
        assert!(PalmError::rectification("no hand").is_request_recoverable());
        assert!(!PalmError::Config("bad".into()).is_request_recoverable());
        let shape = PalmError::SegmentationShapeMismatch {
            expected: vec![1, 1, 256, 256],
            actual: vec![1, 2, 256, 256],
        };
        assert!(!shape.is_request_recoverable());
        assert!(shape.is_fatal_configuration());
    }

    #[test]
    fn display_includes_reason_and_path() {
        let err = PalmError::rectification("only 5 landmarks");
        assert_eq!(err.to_string(), "rectification failed: only 5 landmarks");

        let err = PalmError::model_load(Path::new("models/lines.onnx"), "missing");
        assert!(err.to_string().contains("models/lines.onnx"));
    }
}
