use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mira_core::detector::DetectionMode;
use mira_core::{DatasetBuilder, FaceDetector, Outcome, Recognizer, Training};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "mira", about = "Mira face recognition CLI")]
struct Cli {
    /// Frontal-face Haar cascade XML (overrides MIRA_FRONTAL_CASCADE)
    #[arg(long, global = true)]
    frontal_cascade: Option<PathBuf>,
    /// Profile-face Haar cascade XML (overrides MIRA_PROFILE_CASCADE)
    #[arg(long, global = true)]
    profile_cascade: Option<PathBuf>,
    /// Model artifact (overrides MIRA_MODEL_PATH)
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Label-map artifact (overrides MIRA_LABELS_PATH)
    #[arg(long, global = true)]
    labels: Option<PathBuf>,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the model from a directory of per-person folders
    Train {
        /// Dataset root (overrides MIRA_DATA_DIR)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// Identify the largest face in an image
    Predict {
        /// Image file to recognize
        image: PathBuf,
    },
    /// Run face detection only and print the boxes
    Detect {
        /// Image file to scan
        image: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Mode::Live)]
        mode: Mode,
    },
    /// List enrolled persons
    Labels,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Live,
    Enrollment,
}

impl From<Mode> for DetectionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Live => DetectionMode::Live,
            Mode::Enrollment => DetectionMode::Enrollment,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.frontal_cascade {
        config.frontal_cascade = path;
    }
    if let Some(path) = cli.profile_cascade {
        config.profile_cascade = path;
    }
    if let Some(path) = cli.model {
        config.model_path = path;
    }
    if let Some(path) = cli.labels {
        config.labels_path = path;
    }
    tracing::debug!(?config, "configuration");

    match cli.command {
        Commands::Train { data_dir } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            train(&config, cli.json)
        }
        Commands::Predict { image } => predict(&config, &image, cli.json),
        Commands::Detect { image, mode } => detect(&config, &image, mode.into(), cli.json),
        Commands::Labels => labels(&config, cli.json),
    }
}

fn load_detector(config: &Config) -> Result<FaceDetector> {
    let profile = config
        .profile_cascade
        .exists()
        .then_some(config.profile_cascade.as_path());
    FaceDetector::load(&config.frontal_cascade, profile).with_context(|| {
        format!(
            "loading cascade {} (set MIRA_CASCADE_DIR or --frontal-cascade)",
            config.frontal_cascade.display()
        )
    })
}

fn train(config: &Config, json: bool) -> Result<()> {
    let detector = load_detector(config)?;
    let dataset = DatasetBuilder::new(&detector)
        .build(&config.data_dir)
        .with_context(|| format!("building dataset from {}", config.data_dir.display()))?;
    let training = mira_core::trainer::train_dataset(&dataset).context("training failed")?;
    training
        .save_artifacts(&config.model_path, &config.labels_path)
        .context("saving artifacts")?;

    if json {
        let report = serde_json::json!({
            "diagnostics": training.diagnostics,
            "skipped_files": dataset.skipped().count(),
            "model_path": config.model_path,
            "labels_path": config.labels_path,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_training(&training, dataset.skipped().count(), config);
    }
    Ok(())
}

fn print_training(training: &Training, skipped: usize, config: &Config) {
    let d = &training.diagnostics;
    println!("Training summary");
    println!("{}", "-".repeat(48));
    println!("Persons processed : {}", d.total_persons);
    println!("Total samples     : {}", d.total_samples);
    println!("Skipped files     : {skipped}");
    println!();
    println!("Samples per person:");
    for (name, count) in &d.distribution {
        println!("  {name:<24} {count:>5}");
    }
    if let Some(imb) = &d.imbalance {
        println!();
        println!(
            "Note: imbalanced dataset (min {}, max {}, ratio {:.1}); consider adding images for the smaller classes",
            imb.min, imb.max, imb.ratio
        );
    }
    println!();
    println!("Model  : {}", config.model_path.display());
    println!("Labels : {}", config.labels_path.display());
}

fn predict(config: &Config, image: &Path, json: bool) -> Result<()> {
    let detector = load_detector(config)?;
    let recognizer = Recognizer::load(&config.model_path, &config.labels_path, detector)
        .context("loading recognizer")?;
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let recognition = recognizer.recognize(&bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recognition)?);
        return Ok(());
    }

    match &recognition.outcome {
        Outcome::Unrecognized => println!("Unrecognized person"),
        Outcome::HighConfidence { name, confidence } => {
            println!("Recognized: {name} (confidence {confidence:.1}%)")
        }
        Outcome::MediumConfidence { name, confidence } => {
            println!("Recognized: {name} (medium confidence {confidence:.1}%)")
        }
        Outcome::LowConfidence { name, confidence } => {
            println!("Possible match: {name} (low confidence {confidence:.1}%)")
        }
    }
    let p = &recognition.prediction;
    println!(
        "id={} distance={:.2} face=({}, {}, {}x{})",
        p.label_id, p.distance, p.face.x, p.face.y, p.face.width, p.face.height
    );
    Ok(())
}

fn detect(config: &Config, image: &Path, mode: DetectionMode, json: bool) -> Result<()> {
    let detector = load_detector(config)?;
    let gray = image::open(image)
        .with_context(|| format!("opening {}", image.display()))?
        .to_luma8();
    let boxes = detector.detect(&gray, mode);

    if json {
        println!("{}", serde_json::to_string_pretty(&boxes)?);
        return Ok(());
    }

    if boxes.is_empty() {
        println!("No face detected");
    }
    let largest = mira_core::detector::select_largest(&boxes);
    for b in &boxes {
        let marker = if Some(*b) == largest { "*" } else { " " };
        println!("{marker} x={} y={} w={} h={}", b.x, b.y, b.width, b.height);
    }
    Ok(())
}

fn labels(config: &Config, json: bool) -> Result<()> {
    let map = mira_core::model::load_label_map(&config.labels_path)
        .with_context(|| format!("loading {}", config.labels_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if map.is_empty() {
        println!("No persons enrolled");
    }
    for person in map.persons() {
        println!("{:>4}  {}", person.label_id, person.name);
    }
    Ok(())
}
