//! Palm analysis pipeline: rectify, resize, segment, classify, measure, render.
//!
//! [`PalmReader`] runs the stages for one request at a time, writing each
//! stage's output into the request's [`RequestWorkspace`]. A failing stage stops
//! the request; nothing downstream of it runs or writes.

pub mod classify;
pub mod measure;
pub mod preprocess;
pub mod recognizer;
pub mod rectify;
pub mod render;
pub mod resize;
pub mod segment;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use image::RgbImage;

use crate::{
    config::PipelineConfig,
    error::{PalmError, Result},
    types::Measurements,
    workspace::{self, RequestWorkspace},
};

pub use classify::{Classification, Classifier};
pub use measure::Measurer;
pub use preprocess::{BackgroundRemover, FlatFieldRemover, KeepBackground};
pub use recognizer::{LandmarkDetector, OrtHandLandmarker};
pub use rectify::{Homography, Rectified, Rectifier};
pub use render::{Rendered, Renderer, Summary};
pub use resize::{CanonicalSet, Resizer};
pub use segment::{
    LineMask, LineSegmenter, OrtSegmentationModel, ProbabilityMap, SegmentationModel,
};

/// Everything one request produced. Immutable once returned.
#[derive(Clone, Debug)]
pub struct ResultRecord {
    /// Rectified full-resolution palm image on disk.
    pub canonical_path: PathBuf,
    pub transform: Homography,
    pub classification: Classification,
    pub measurements: Measurements,
    pub annotated: RgbImage,
    pub annotated_path: PathBuf,
    pub summary_path: PathBuf,
    pub summary: Summary,
}

impl ResultRecord {
    pub fn has_lines(&self) -> bool {
        !self.classification.is_empty()
    }
}

pub struct PalmReader<D, B> {
    detector: D,
    background: B,
    rectifier: Rectifier,
    resizer: Resizer,
    segmenter: LineSegmenter,
    classifier: Classifier,
    measurer: Measurer,
    renderer: Renderer,
}

impl<D: LandmarkDetector, B: BackgroundRemover> PalmReader<D, B> {
    pub fn new(
        cfg: PipelineConfig,
        detector: D,
        background: B,
        model: Arc<dyn SegmentationModel>,
    ) -> Result<Self> {
        cfg.validate()?;
        let PipelineConfig {
            rectify,
            resize,
            segment,
            classify,
            measure,
            render,
            ..
        } = cfg;

        let unit = measure.unit_label.clone();
        Ok(Self {
            detector,
            background,
            rectifier: Rectifier::new(rectify),
            resizer: Resizer::new(resize),
            segmenter: LineSegmenter::new(model, segment),
            classifier: Classifier::new(classify),
            measurer: Measurer::new(measure),
            renderer: Renderer::new(render, unit),
        })
    }

    pub fn analyze(&mut self, input: &Path, ws: &RequestWorkspace) -> Result<ResultRecord> {
        let image = workspace::load_rgb(input)?;
        log::info!(
            "analyzing {} ({}x{}) into {}",
            input.display(),
            image.width(),
            image.height(),
            ws.root().display()
        );
        self.analyze_image(&image, ws)
    }

    pub fn analyze_image(
        &mut self,
        image: &RgbImage,
        ws: &RequestWorkspace,
    ) -> Result<ResultRecord> {
        let started = Instant::now();
        let paths = ws.paths();

        let clean = self.background.remove_background(image)?;
        workspace::save_rgb(&paths.clean, &clean)?;

        let landmarks = self
            .detector
            .detect(image)?
            .ok_or_else(|| PalmError::rectification("no hand detected in the photo"))?;
        let Rectified {
            image: warped,
            transform,
        } = self.rectifier.rectify(image, &landmarks)?;
        let warped_clean = self.background.remove_background(&warped)?;

        let canonical = self.resizer.canonical_set(&warped, &warped_clean)?;
        workspace::save_rgb(&paths.warped, &canonical.full)?;
        workspace::save_rgb(&paths.warped_clean, &canonical.clean)?;
        workspace::save_rgb(&paths.warped_mini, &canonical.mini)?;
        workspace::save_rgb(&paths.warped_clean_mini, &canonical.clean_mini)?;

        let segmentation = self.segmenter.segment(&canonical.clean)?;
        workspace::save_gray(&paths.palm_lines, segmentation.mask.as_gray())?;

        let classification = self.classifier.classify(&segmentation.mask);
        let measurements = self.measurer.measure(&classification, &canonical.mini);
        let Rendered {
            image: annotated,
            summary,
        } = self
            .renderer
            .render(&canonical.mini, &classification, &measurements);
        workspace::save_rgb(&paths.result_image, &annotated)?;
        workspace::write_json(&paths.result_json, &summary)?;

        if summary.is_empty() {
            log::warn!("no principal lines detected");
        }
        log::info!(
            "request finished in {:.0?}: {} lines from {} strokes",
            started.elapsed(),
            summary.line_count(),
            summary.stroke_count
        );

        Ok(ResultRecord {
            canonical_path: paths.warped.clone(),
            transform,
            classification,
            measurements,
            annotated,
            annotated_path: paths.result_image.clone(),
            summary_path: paths.result_json.clone(),
            summary,
        })
    }
}
