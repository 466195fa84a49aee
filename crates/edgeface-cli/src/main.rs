mod display;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use display::ConsoleDisplay;
use edgeface_core::{
    Config, KnnClassifier, LoopReport, NpyStore, RecognitionLoop, SampleStore, SeetaDetector,
    Termination,
};
use edgeface_hw::Camera;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "edge-face",
    about = "Real-time CPU face recognition with a cascade detector and k-NN"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face samples for one person
    Collect {
        /// Name stored with every collected sample
        #[arg(short, long)]
        name: String,
        /// Configuration file (TOML); packaged defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Recognize faces in the live camera feed
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List enrolled individuals and their sample counts
    List {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect { name, config } => collect(name, load_config(config)?).await,
        Commands::Run { config } => run(load_config(config)?).await,
        Commands::List { config } => list(&load_config(config)?),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    Config::load(path.as_deref()).context("failed to load configuration")
}

async fn collect(name: String, config: Config) -> Result<()> {
    tracing::info!(
        name = %name,
        quota = config.face.samples_per_person,
        stride = config.face.sample_stride,
        "collecting face samples (Ctrl-C to cancel)"
    );

    let cancel = cancel_on_ctrl_c();
    let data_dir = config.paths.data_dir.clone();
    let quota = config.face.samples_per_person;

    // v4l and rustface handles stay on the blocking thread that created them.
    let report = tokio::task::spawn_blocking(move || -> Result<LoopReport> {
        let mut detector = SeetaDetector::load(&config.detector_params())?;
        let mut camera = open_camera(&config)?;
        let mut display = ConsoleDisplay::new(cancel, config.paths.preview.clone());
        let mut store = NpyStore::new(&config.paths.data_dir);

        let report = RecognitionLoop::collect(name, &mut store, config.loop_settings())?
            .run(&mut camera, &mut detector, &mut display)?;
        Ok(report)
    })
    .await
    .context("collection task failed")??;

    match (report.persisted, report.termination) {
        (true, Termination::QuotaReached) => println!(
            "Saved {} samples to {}",
            report.collected,
            data_dir.display()
        ),
        (true, _) => println!(
            "Camera stream ended; saved {} of {quota} samples to {}",
            report.collected,
            data_dir.display()
        ),
        (false, _) => println!(
            "Collection cancelled after {} of {quota} samples; nothing saved",
            report.collected
        ),
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let store = NpyStore::new(&config.paths.data_dir);
    let dataset = store.load().context("failed to load face dataset")?;
    tracing::info!(
        dir = %store.dir().display(),
        samples = dataset.len(),
        individuals = dataset.individuals().len(),
        "dataset loaded"
    );

    let knn = KnnClassifier::new(config.knn.k, config.knn.weights)?;
    let model = match knn.train(dataset) {
        Ok(model) => model,
        Err(e) if e.is_configuration_error() => {
            return Err(e).with_context(|| {
                format!(
                    "cannot recognize with the samples in {}; run `edge-face collect --name <NAME>` first",
                    store.dir().display()
                )
            });
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(
        k = knn.k(),
        weights = ?knn.weighting(),
        dimension = model.dimension(),
        "classifier trained"
    );

    let expected = config.face.size.feature_len();
    if model.dimension() != expected {
        bail!(
            "stored samples have {} values each but face.size [{}, {}] produces {expected}; \
             recollect or restore the previous face.size",
            model.dimension(),
            config.face.size.width,
            config.face.size.height,
        );
    }

    let cancel = cancel_on_ctrl_c();
    let report = tokio::task::spawn_blocking(move || -> Result<LoopReport> {
        let mut detector = SeetaDetector::load(&config.detector_params())?;
        let mut camera = open_camera(&config)?;
        let mut display = ConsoleDisplay::new(cancel, config.paths.preview.clone());

        let report = RecognitionLoop::recognize(
            &model,
            config.recognition.unknown_distance,
            config.loop_settings(),
        )?
        .run(&mut camera, &mut detector, &mut display)?;
        Ok(report)
    })
    .await
    .context("recognition task failed")??;

    tracing::info!(frames = report.frames, termination = ?report.termination, "recognition stopped");
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = NpyStore::new(&config.paths.data_dir);
    let dataset = store.load().context("failed to load face dataset")?;

    if dataset.is_empty() {
        println!("No individuals enrolled in {}", store.dir().display());
        return Ok(());
    }

    println!("{:<24} SAMPLES", "NAME");
    for (name, count) in dataset.individuals() {
        println!("{name:<24} {count}");
    }
    println!(
        "{} samples, {} values per sample",
        dataset.len(),
        dataset.dimension().unwrap_or(0)
    );
    Ok(())
}

fn open_camera(config: &Config) -> Result<Camera> {
    let mut camera = Camera::open(&config.camera.device, config.camera.width, config.camera.height)
        .with_context(|| format!("cannot access camera {}", config.camera.device))?;
    tracing::info!(
        device = %camera.device_path,
        fourcc = ?camera.fourcc,
        width = camera.width,
        height = camera.height,
        "camera ready"
    );
    camera.discard_frames(config.camera.warmup_frames);
    Ok(camera)
}

/// Flag raised by the first Ctrl-C; the frame loop polls it after each frame.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current frame");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}
