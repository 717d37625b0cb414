use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::ValueType,
};

use palm_lines::{
    PalmError, PalmReader, PipelineConfig, RequestWorkspace,
    model_download::{ModelDownloadEvent, ModelKind, ensure_model_ready},
    pipeline::{
        BackgroundRemover, FlatFieldRemover, KeepBackground, OrtHandLandmarker,
        OrtSegmentationModel, SegmentationModel,
    },
};

/// Exit code for photos in which no usable hand could be found.
const EXIT_RETAKE_PHOTO: u8 = 2;

#[derive(Parser)]
#[command(name = "palm-lines")]
#[command(about = "Find, classify and measure the principal lines of a palm photo")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one palm photo.
    Analyze(AnalyzeArgs),

    /// Print input and output tensors of an ONNX model.
    InspectModel {
        /// Path to the .onnx file.
        model: PathBuf,
    },

    /// Print the effective pipeline configuration as JSON.
    DumpConfig {
        /// Configuration file to load instead of the defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct AnalyzeArgs {
    /// Path to the palm photo.
    #[arg(long)]
    image: PathBuf,

    /// Directory in which a fresh per-request directory is created.
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Pipeline configuration (JSON). Missing fields use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the JSON summary instead of the text summary.
    #[arg(long)]
    json: bool,

    /// Skip background removal, for photos that are already clean.
    #[arg(long)]
    keep_background: bool,

    /// Override the palm detector model path.
    #[arg(long)]
    palm_detector: Option<PathBuf>,

    /// Override the hand landmark model path.
    #[arg(long)]
    hand_landmarks: Option<PathBuf>,

    /// Override the line segmentation model path.
    #[arg(long)]
    line_segmenter: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Analyze(args) => analyze(args),
        Commands::InspectModel { model } => inspect_model(&model).map(|_| ExitCode::SUCCESS),
        Commands::DumpConfig { config } => {
            dump_config(config.as_deref()).map(|_| ExitCode::SUCCESS)
        }
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn analyze(args: AnalyzeArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = args.palm_detector {
        config.models.palm_detector = path;
    }
    if let Some(path) = args.hand_landmarks {
        config.models.hand_landmarks = path;
    }
    if let Some(path) = args.line_segmenter {
        config.models.line_segmenter = path;
    }
    config.validate()?;

    ensure_model_ready(ModelKind::PalmDetector, &config.models.palm_detector, log_download)?;
    ensure_model_ready(
        ModelKind::HandposeEstimator,
        &config.models.hand_landmarks,
        log_download,
    )?;

    let detector =
        OrtHandLandmarker::new(&config.models.hand_landmarks, &config.models.palm_detector)?;
    let model: Arc<dyn SegmentationModel> = Arc::new(OrtSegmentationModel::load(
        &config.models.line_segmenter,
        &config.segment,
    )?);
    let background: Box<dyn BackgroundRemover> = if args.keep_background {
        Box::new(KeepBackground)
    } else {
        Box::new(FlatFieldRemover::new(&config.background))
    };

    let mut reader = PalmReader::new(config, detector, background, model)?;
    let workspace = RequestWorkspace::create(&args.results_dir)?;

    let record = match reader.analyze(&args.image, &workspace) {
        Ok(record) => record,
        Err(err @ PalmError::RectificationFailed { .. }) => {
            log::warn!("{err}");
            eprintln!("{}", err.user_message());
            return Ok(ExitCode::from(EXIT_RETAKE_PHOTO));
        }
        Err(err) => return Err(err.into()),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&record.summary)
            .context("failed to serialize summary")?;
        println!("{json}");
    } else {
        println!("{}", record.summary.to_text());
        println!("annotated image: {}", record.annotated_path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn log_download(event: ModelDownloadEvent) {
    match event {
        ModelDownloadEvent::AlreadyPresent { model } => {
            log::debug!("{} model already present", model.label());
        }
        ModelDownloadEvent::Started { model, total } => {
            log::info!("downloading {} model ({total:?} bytes)", model.label());
        }
        ModelDownloadEvent::Finished { model } => {
            log::debug!("{} model ready", model.label());
        }
        ModelDownloadEvent::Progress { .. } => {}
    }
}

fn inspect_model(model_path: &Path) -> Result<()> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load {}", model_path.display()))?;

    println!("Model: {}", model_path.display());
    println!("Inputs:");
    for (idx, input) in session.inputs.iter().enumerate() {
        println!("  {idx}: name=\"{}\" type={:?}", input.name, input.input_type);
        if let ValueType::Tensor { shape, .. } = &input.input_type {
            println!("     shape={shape:?}");
        }
    }
    println!("Outputs:");
    for (idx, output) in session.outputs.iter().enumerate() {
        println!("  {idx}: name=\"{}\" type={:?}", output.name, output.output_type);
        if let ValueType::Tensor { shape, .. } = &output.output_type {
            println!("     shape={shape:?}");
        }
    }
    Ok(())
}

fn dump_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", config.to_json_pretty()?);
    Ok(())
}
