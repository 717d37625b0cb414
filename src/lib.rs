//! Extraction, classification and measurement of the principal palm lines
//! (heart, head, life, fate) from a single photograph of a hand.

pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod types;
pub mod workspace;

pub use config::PipelineConfig;
pub use error::{PalmError, Result};
pub use pipeline::{PalmReader, ResultRecord};
pub use types::{ClassifiedLine, HandLandmarks, LineKind, Measurement, Measurements, Stroke};
pub use workspace::{ArtifactPaths, RequestWorkspace};
