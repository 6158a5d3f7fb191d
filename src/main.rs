use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fast_anomaly_detector::ml_core::{OptimizerKind, ReconstructionLoss};
use fast_anomaly_detector::{
    anomaly_detector, ArtifactPaths, DatasetKind, DetectorConfig, DetectorKind, FeatureTable,
    LoadOutcome, Scaler, ScalingMethod, TrainReport,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fast-anomaly-detector")]
#[command(author = "Hummer Team")]
#[command(version = "0.1.0")]
#[command(about = "Train and run Gaussian mixture or autoencoder anomaly detectors", long_about = None)]
struct Cli {
    /// JSON configuration file; missing keys take their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding scaler and model artifacts (overrides the configuration)
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a feature scaler on a CSV file and persist it for the dataset
    FitScaler {
        /// Dataset name (`location`, anything else is treated as velocity)
        #[arg(short, long)]
        dataset: String,

        /// Path to CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Scaling method: minmax, standard or none
        #[arg(short, long, default_value = "minmax")]
        method: String,
    },

    /// Train a detector and persist its model and threshold
    Train {
        /// Detector type: classic or deep_learning
        #[arg(long)]
        detector: String,

        #[arg(short, long)]
        dataset: String,

        /// Training CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Validation CSV file (autoencoder only)
        #[arg(long)]
        validation: Option<PathBuf>,

        /// Number of mixture components
        #[arg(long)]
        components: Option<usize>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Optimizer: adam, sgd or rmsprop
        #[arg(long)]
        optimizer: Option<String>,

        /// Training loss: mae or mse
        #[arg(long)]
        loss: Option<String>,

        #[arg(long)]
        learning_rate: Option<f64>,
    },

    /// Classify every row of a CSV or JSON file with a trained detector
    Detect {
        #[arg(long)]
        detector: String,

        #[arg(short, long)]
        dataset: String,

        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DetectorConfig::from_file(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?,
        None => DetectorConfig::default(),
    };
    if let Some(dir) = cli.artifact_dir {
        config.artifact_dir = dir;
    }

    match cli.command {
        Commands::FitScaler {
            dataset,
            file,
            method,
        } => {
            let table = read_table(&file)?;
            let method: ScalingMethod = method.parse()?;
            let path = scaler_path(&config, &dataset);
            let scaler = fit_and_save_scaler(&table, method, &path)?;
            println!(
                "Fitted {} scaler on {} features from {} rows, saved to {}",
                scaler.method(),
                scaler.n_features(),
                table.len(),
                path.display()
            );
        }

        Commands::Train {
            detector,
            dataset,
            file,
            validation,
            components,
            epochs,
            batch_size,
            optimizer,
            loss,
            learning_rate,
        } => {
            if let Some(n) = components {
                config.gmm.n_components = n;
            }
            if let Some(n) = epochs {
                config.deep_learning.epochs = n;
            }
            if let Some(n) = batch_size {
                config.deep_learning.batch_size = n;
            }
            if let Some(name) = optimizer {
                config.deep_learning.optimizer = name.parse::<OptimizerKind>()?;
            }
            if let Some(name) = loss {
                config.deep_learning.loss = name.parse::<ReconstructionLoss>()?;
            }
            if learning_rate.is_some() {
                config.deep_learning.learning_rate = learning_rate;
            }

            let mut detector = anomaly_detector(&detector, &dataset, &config)?;
            let table = read_table(&file)?;
            let scaler = training_scaler(&table, &detector.artifacts().scaler_path())?;

            let x_train = scaler.transform(&table.aligned_to(&scaler)?.features)?;
            let x_validation = match validation {
                Some(path) => Some(scaler.transform(&read_table(&path)?.aligned_to(&scaler)?.features)?),
                None => None,
            };

            detector.build_model(x_train.ncols())?;
            let report = detector.train(&x_train, x_validation.as_ref())?;

            println!(
                "Trained {} detector on {} rows, model saved to {}",
                detector.kind(),
                table.len(),
                detector.artifacts().model_path().display()
            );
            if let TrainReport::DeepLearning(history) = &report {
                if let Some(loss) = history.loss.last() {
                    println!("Final training loss: {:.6}", loss);
                }
                if let Some(val_loss) = history.val_loss.last() {
                    println!("Final validation loss: {:.6}", val_loss);
                }
            }
            if let Some(threshold) = detector.threshold() {
                println!("Anomaly threshold: {:.6}", threshold);
            }
        }

        Commands::Detect {
            detector,
            dataset,
            file,
        } => {
            let mut detector = anomaly_detector(&detector, &dataset, &config)?;
            let mut table = read_table(&file)?;
            if let LoadOutcome::Loaded(scaler) = Scaler::load(&detector.artifacts().scaler_path()) {
                table = table.aligned_to(&scaler)?;
            }
            let detections = detector.detect_anomalies(&table.features)?;

            for detection in &detections {
                println!("Data point at index {} is {}", detection.index, detection.verdict);
            }
            let anomalies = detections.iter().filter(|d| d.is_anomaly()).count();
            println!(
                "\n{} of {} data points are abnormal",
                anomalies,
                detections.len()
            );
        }
    }

    Ok(())
}

fn read_table(path: &Path) -> anyhow::Result<FeatureTable> {
    let table = FeatureTable::from_path(path)
        .with_context(|| format!("failed to load features from {}", path.display()))?;
    if table.is_empty() {
        bail!("{} contains no data rows", path.display());
    }
    info!(path = %path.display(), rows = table.len(), columns = ?table.columns, "features loaded");
    Ok(table)
}

fn scaler_path(config: &DetectorConfig, dataset: &str) -> PathBuf {
    // The scaler name depends only on the dataset
    ArtifactPaths::new(
        DetectorKind::Classic,
        DatasetKind::from_name(dataset),
        config.artifact_dir.clone(),
    )
    .scaler_path()
}

fn fit_and_save_scaler(table: &FeatureTable, method: ScalingMethod, path: &Path) -> anyhow::Result<Scaler> {
    let scaler = Scaler::fit(&table.features, method)?.with_columns(table.columns.clone())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    scaler.save(path)?;
    Ok(scaler)
}

/// Reuse the persisted scaler when present, otherwise fit a min-max scaler on
/// the training rows
fn training_scaler(table: &FeatureTable, path: &Path) -> anyhow::Result<Scaler> {
    match Scaler::load(path) {
        LoadOutcome::Loaded(scaler) => {
            info!(path = %path.display(), "using persisted scaler");
            Ok(scaler)
        }
        LoadOutcome::NotFound(_) => {
            warn!(path = %path.display(), "no scaler found, fitting a min-max scaler on the training data");
            fit_and_save_scaler(table, ScalingMethod::MinMax, path)
        }
        LoadOutcome::Corrupt { path, reason } => {
            bail!("scaler {} is unreadable: {}", path.display(), reason)
        }
    }
}
