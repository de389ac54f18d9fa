//! Model trainer CLI
//!
//! Command-line interface for running the training stage, predicting with a
//! saved bundle and inspecting bundle metadata.

use clap::{Parser, Subcommand};
use colored::*;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{ModelTrainerConfig, TrackingConfig};
use crate::entity::{ClassificationMetricArtifact, DataTransformationArtifact};
use crate::export::{load_object, ModelBundle};
use crate::pipeline::ModelTrainer;
use crate::utils::load_numeric_array;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: impl std::fmt::Display) {
    println!("  {:<16} {}", muted(key), val.to_string().white());
}

fn metric_row(split: &str, m: &ClassificationMetricArtifact) {
    println!(
        "  {:<8} {:>10.4} {:>10.4} {:>10.4}",
        split, m.f1_score, m.precision_score, m.recall_score
    );
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "model-trainer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tune, compare and package binary classifiers")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the model training stage on transformed arrays
    Train {
        /// Transformed training array (.npy, .csv or .parquet), target in the last column
        #[arg(long)]
        train: PathBuf,

        /// Transformed test array
        #[arg(long)]
        test: PathBuf,

        /// Fitted preprocessor written by the transformation stage
        #[arg(long)]
        preprocessor: PathBuf,

        /// Artifact directory the bundle is written under
        #[arg(long, default_value = "artifacts")]
        artifact_dir: PathBuf,

        /// Bundle path, overrides the artifact-directory layout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path of the bare model copy
        #[arg(long)]
        final_model: Option<PathBuf>,

        /// Trainer configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the resulting artifact as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Tracking server URI or local store directory
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        tracking_uri: Option<String>,

        /// Experiment runs are recorded in
        #[arg(long, env = "MLFLOW_EXPERIMENT_NAME")]
        experiment: Option<String>,
    },

    /// Predict with a saved bundle
    Predict {
        /// Bundle file
        #[arg(short, long)]
        model: PathBuf,

        /// Raw feature array (.npy, .csv or .parquet)
        #[arg(short, long)]
        data: PathBuf,

        /// Write predictions to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the metadata of a saved bundle
    Info {
        /// Bundle file
        #[arg(short, long)]
        model: PathBuf,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn cmd_train(
    train: &Path,
    test: &Path,
    preprocessor: &Path,
    artifact_dir: &Path,
    output: Option<&Path>,
    final_model: Option<&Path>,
    config_path: Option<&Path>,
    report: Option<&Path>,
    tracking_uri: Option<String>,
    experiment: Option<String>,
) -> anyhow::Result<()> {
    section("Train");

    let mut config = match config_path {
        Some(path) => ModelTrainerConfig::from_json_file(path)?,
        None => ModelTrainerConfig::from_artifact_dir(artifact_dir),
    };
    if let Some(path) = output {
        config = config.with_trained_model_file_path(path);
    }
    if let Some(path) = final_model {
        config = config.with_final_model_file_path(path);
    }

    let mut tracking = TrackingConfig::from_env();
    if let Some(uri) = tracking_uri {
        tracking.tracking_uri = uri;
    }
    if let Some(name) = experiment {
        tracking = tracking.with_experiment_name(name);
    }

    kv("Train", train.display());
    kv("Test", test.display());
    kv("Tracking", &tracking.tracking_uri);
    kv("CV folds", config.cv_folds);

    let artifact = DataTransformationArtifact::new(preprocessor, train, test);
    let trainer = ModelTrainer::from_tracking_config(config, artifact, &tracking)?;

    step_run("Searching candidates");
    let start = Instant::now();
    let result = trainer.initiate_model_trainer().await?;
    step_done(&format!("{:.2?}", start.elapsed()));

    println!();
    println!(
        "  {:<8} {:>10} {:>10} {:>10}",
        muted("Split"),
        muted("F1"),
        muted("Precision"),
        muted("Recall")
    );
    println!("  {}", dim(&"─".repeat(42)));
    metric_row("train", &result.train_metric_artifact);
    metric_row("test", &result.test_metric_artifact);
    println!();
    println!("  {} {}", ok("saved"), result.trained_model_file_path.display());

    if let Some(path) = report {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&result)?)?;
        println!("  {} {}", ok("report"), path.display());
    }

    println!();
    Ok(())
}

pub fn cmd_predict(model_path: &Path, data_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading bundle");
    let bundle: ModelBundle = load_object(model_path)?;
    step_done(&bundle.metadata.model_name);

    step_run("Loading data");
    let x = load_numeric_array(data_path)?;
    step_done(&format!("{} rows × {} cols", x.nrows(), x.ncols()));

    let start = Instant::now();
    let predictions = bundle.predict(&x)?;
    let positives = predictions.iter().filter(|&&p| p == 1.0).count();

    kv("Rows", predictions.len());
    kv("Positive", positives);
    kv("Time", format!("{:.2?}", start.elapsed()));

    if let Some(path) = output {
        let mut df = DataFrame::new(vec![Column::new("prediction".into(), predictions.to_vec())])?;
        let mut file = std::fs::File::create(path)?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        println!("  {} {}", ok("saved"), path.display());
    }

    println!();
    Ok(())
}

pub fn cmd_info(model_path: &Path) -> anyhow::Result<()> {
    section("Model Info");

    let bundle: ModelBundle = load_object(model_path)?;
    let meta = &bundle.metadata;

    kv("File", model_path.display());
    kv("Model", &meta.model_name);
    kv("Preprocessor", bundle.preprocessor.name());
    kv("Trained at", &meta.trained_at);
    kv("Version", &meta.crate_version);

    if !meta.best_params.is_empty() {
        section("Parameters");
        for (name, value) in &meta.best_params {
            kv(name, value);
        }
    }

    section("Metrics");
    println!(
        "  {:<8} {:>10} {:>10} {:>10}",
        muted("Split"),
        muted("F1"),
        muted("Precision"),
        muted("Recall")
    );
    metric_row("train", &meta.train_metrics);
    metric_row("test", &meta.test_metrics);

    println!();
    Ok(())
}
