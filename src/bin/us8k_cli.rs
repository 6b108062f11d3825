use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use us8k_classifier::cache::FeatureCacheBuilder;
use us8k_classifier::config::AppConfig;
use us8k_classifier::dataset::acquire::{prepare_dataset, DEFAULT_ARCHIVE_URL};
use us8k_classifier::dataset::{DatasetOrganizer, SplitSelection};
use us8k_classifier::features::FeaturePipeline;
use us8k_classifier::model::{Classifier, ModelArtifact, Trainer};

#[derive(Parser, Debug)]
#[command(
    name = "us8k_cli",
    about = "Dataset preparation, feature caching, training and offline prediction"
)]
struct Cli {
    /// JSON configuration file (defaults to $US8K_CONFIG or config/us8k.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SourceMode {
    /// `<source>/<class>/<clip>` folders
    Directory,
    /// Metadata table with fold assignments
    Metadata,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SplitArg {
    All,
    Train,
    Test,
}

impl From<SplitArg> for SplitSelection {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::All => SplitSelection::All,
            SplitArg::Train => SplitSelection::Train,
            SplitArg::Test => SplitSelection::Test,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download and organize the dataset into data/train and data/test
    Fetch {
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
        #[arg(long, default_value = DEFAULT_ARCHIVE_URL)]
        url: String,
    },
    /// Copy a metadata-mode dataset into per-split class folders
    Organize {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        train_out: PathBuf,
        #[arg(long)]
        test_out: PathBuf,
    },
    /// Extract log-mel features into X.npy / y.npy / classes.txt
    Extract {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = SourceMode::Directory)]
        mode: SourceMode,
        /// Which fold partition to extract in metadata mode
        #[arg(long, value_enum, default_value_t = SplitArg::All)]
        split: SplitArg,
    },
    /// Train the CNN on a feature cache and save the model artifact
    Train {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        model_output: PathBuf,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Classify one audio file with the configured model artifact
    Predict {
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    us8k_classifier::init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    if cli.config.is_some() {
        config.apply_env_overrides();
    }
    if let Err(reason) = config.validate() {
        bail!("invalid configuration: {}", reason);
    }

    match cli.command {
        Commands::Fetch { work_dir, url } => run_fetch(&work_dir, &url),
        Commands::Organize {
            source,
            train_out,
            test_out,
        } => run_organize(&source, &train_out, &test_out),
        Commands::Extract {
            source,
            out,
            mode,
            split,
        } => run_extract(&config, &source, &out, mode, split.into()),
        Commands::Train {
            data,
            model_output,
            epochs,
            batch_size,
        } => run_train(&config, &data, &model_output, epochs, batch_size),
        Commands::Predict { file } => run_predict(&config, &file),
    }
}

fn run_fetch(work_dir: &Path, url: &str) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let prepared = runtime
        .block_on(prepare_dataset(work_dir, url))
        .context("preparing dataset")?;

    println!("Raw data: {}", prepared.raw_dir.display());
    println!(
        "Train: {} files in {}",
        prepared.train_files,
        prepared.train_dir.display()
    );
    println!(
        "Test: {} files in {}",
        prepared.test_files,
        prepared.test_dir.display()
    );
    Ok(ExitCode::from(0))
}

fn run_organize(source: &Path, train_out: &Path, test_out: &Path) -> Result<ExitCode> {
    let split = DatasetOrganizer::from_metadata(source)
        .with_context(|| format!("reading metadata under {}", source.display()))?;
    let (train, test) = DatasetOrganizer::organize_split(&split, train_out, test_out)?;
    println!("Copied {} train and {} test files", train, test);
    Ok(ExitCode::from(0))
}

fn run_extract(
    config: &AppConfig,
    source: &Path,
    out: &Path,
    mode: SourceMode,
    split: SplitSelection,
) -> Result<ExitCode> {
    let records = match mode {
        SourceMode::Directory => DatasetOrganizer::from_directory(source)
            .with_context(|| format!("walking {}", source.display()))?,
        SourceMode::Metadata => {
            let dataset = DatasetOrganizer::from_metadata(source)
                .with_context(|| format!("reading metadata under {}", source.display()))?;
            split.select(&dataset)
        }
    };

    let builder = FeatureCacheBuilder::new(FeaturePipeline::from_config(config));
    let cache = builder
        .build_to_dir(&records, out)
        .with_context(|| format!("writing feature cache to {}", out.display()))?;

    let (n, n_mels, n_frames) = cache.shape();
    println!("Classes: {}", cache.classes.len());
    println!("Samples: {} of shape ({}, {})", n, n_mels, n_frames);
    Ok(ExitCode::from(0))
}

fn run_train(
    config: &AppConfig,
    data: &Path,
    model_output: &Path,
    epochs: Option<usize>,
    batch_size: Option<usize>,
) -> Result<ExitCode> {
    let mut trainer = Trainer::new(config.training.clone());
    if let Some(epochs) = epochs {
        trainer = trainer.with_epochs(epochs);
    }
    if let Some(batch_size) = batch_size {
        trainer = trainer.with_batch_size(batch_size);
    }

    let artifact = ModelArtifact::beside_model(model_output);
    let trained = trainer
        .train_from_cache_dir(data, &artifact)
        .with_context(|| format!("training on {}", data.display()))?;

    println!("{}", trained.report);
    println!("Saved model to {}", artifact.model_path.display());
    println!("Saved classes to {}", artifact.classes_path.display());
    Ok(ExitCode::from(0))
}

fn run_predict(config: &AppConfig, file: &Path) -> Result<ExitCode> {
    let artifact = ModelArtifact::from_config(&config.service);
    let classifier = Classifier::load(&artifact).context("loading model artifact")?;
    let pipeline = FeaturePipeline::from_config(config);

    let spectrogram = pipeline
        .spectrogram_from_path(file)
        .with_context(|| format!("decoding {}", file.display()))?;
    let prediction = classifier.predict(&spectrogram)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "prediction": prediction.label,
            "probs": prediction.probs,
            "classes": classifier.classes(),
        }))?
    );
    Ok(ExitCode::from(0))
}
