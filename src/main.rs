use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use handcue::classifier::GestureClassifier;
use handcue::config::Config;
use handcue::dataset::{Dataset, SampleWriter};
use handcue::dispatch::{ActionDispatcher, ActionExecutor, LogExecutor};
use handcue::features;
use handcue::gesture::GestureLabel;
use handcue::landmarks::{LandmarkSource, ReplayFeed};
use handcue::pipeline::{FrameState, GesturePipeline};
use handcue::smoother::GestureSmoother;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Set by the SIGINT/SIGTERM handlers
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Override the classification confidence threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the smoothing window size
    #[arg(long)]
    history: Option<usize>,

    /// Use one cooldown (milliseconds) for every action
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Forget the smoothing window whenever the hand is lost
    #[arg(long)]
    clear_on_no_hand: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize gestures from the webcam and send media keys
    Run {
        /// Log actions instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the recognizer over a recorded landmark file (JSON lines)
    Replay {
        input: PathBuf,

        /// Pace frames at this rate; 0 runs as fast as possible
        #[arg(long, default_value_t = 0)]
        fps: u32,

        /// Log actions instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Train a classifier from the collected samples
    Train,

    /// Record samples of one gesture from the webcam
    Collect {
        /// Gesture name (PALM, FIST, PINCH, POINT, V_SIGN)
        #[arg(short, long)]
        label: String,

        /// Number of samples; config default when omitted
        #[arg(short, long)]
        samples: Option<usize>,

        /// Milliseconds between captures
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("handcue starting");
    install_signal_handlers();

    let config = load_config(&args)?;

    match args.command {
        Command::Run { dry_run } => {
            let mut feed = open_camera_feed(&config)?;
            run(&config, feed.as_mut(), config.camera.fps, dry_run)
        }
        Command::Replay { input, fps, dry_run } => {
            let mut feed = ReplayFeed::open(&input)?;
            run(&config, &mut feed, fps, dry_run)
        }
        Command::Train => train(&config),
        Command::Collect {
            label,
            samples,
            interval_ms,
        } => {
            let label = GestureLabel::from_name(&label)
                .filter(|l| *l != GestureLabel::Unknown)
                .with_context(|| format!("Unknown gesture {:?}", label))?;
            let samples = samples.unwrap_or(config.training.samples_per_gesture);
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.training.capture_interval_ms));
            let mut feed = open_camera_feed(&config)?;
            collect(&config, feed.as_mut(), label, samples, interval)
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

#[cfg(unix)]
extern "C" fn signal_handler(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    if let Some(threshold) = args.threshold {
        config.gesture.confidence_threshold = threshold;
    }
    if let Some(history) = args.history {
        config.gesture.history_size = history;
    }
    if let Some(cooldown_ms) = args.cooldown_ms {
        config.set_cooldown_ms(cooldown_ms);
    }
    if args.clear_on_no_hand {
        config.gesture.clear_on_no_hand = true;
    }

    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Threshold: {}, history: {}, clear on no hand: {}",
        config.gesture.confidence_threshold,
        config.gesture.history_size,
        config.gesture.clear_on_no_hand
    );
    Ok(config)
}

#[cfg(all(feature = "camera", feature = "onnx"))]
fn open_camera_feed(config: &Config) -> Result<Box<dyn LandmarkSource>> {
    use handcue::capture::{CaptureSource, WebcamCapture};
    use handcue::landmarks::{CameraFeed, OnnxHandLandmarker};

    let model_path = config
        .detection
        .model_path
        .as_ref()
        .context("detection.model_path must point to a hand landmark ONNX model")?;

    let capture = WebcamCapture::new(config.camera.device, config.camera.width, config.camera.height)
        .context("Failed to initialize webcam capture")?;
    let (width, height) = capture.resolution();
    tracing::info!("Capture: {}x{}", width, height);

    let detector = OnnxHandLandmarker::new(model_path, config.detection.detection_confidence)
        .context("Failed to load hand landmark model")?;

    Ok(Box::new(CameraFeed::new(capture, detector, config.camera.mirror)))
}

#[cfg(not(all(feature = "camera", feature = "onnx")))]
fn open_camera_feed(_config: &Config) -> Result<Box<dyn LandmarkSource>> {
    bail!("Live capture needs a build with the `camera` and `onnx` features; use `replay` for recorded landmarks")
}

#[cfg(feature = "media-keys")]
fn executor(dry_run: bool) -> Result<Box<dyn ActionExecutor>> {
    if dry_run {
        return Ok(Box::new(LogExecutor::new()));
    }
    let keys = handcue::dispatch::MediaKeyExecutor::new()?;
    Ok(Box::new(keys))
}

#[cfg(not(feature = "media-keys"))]
fn executor(dry_run: bool) -> Result<Box<dyn ActionExecutor>> {
    if !dry_run {
        tracing::info!("Built without media-keys; actions are only logged");
    }
    Ok(Box::new(LogExecutor::new()))
}

fn run(config: &Config, feed: &mut dyn LandmarkSource, target_fps: u32, dry_run: bool) -> Result<()> {
    let base = config.paths.model_base();
    let classifier = GestureClassifier::load(&base)
        .with_context(|| format!("No usable model at {}; run `train` first", base.display()))?;
    let model = classifier.model()?;
    tracing::info!("Classes: {:?}", model.classes());

    let smoother = GestureSmoother::new(
        config.gesture.history_size,
        config.gesture.confidence_threshold,
        config.gesture.clear_on_no_hand,
    );
    let dispatcher = ActionDispatcher::new(config.actions.bindings.clone(), executor(dry_run)?);
    for (label, binding) in dispatcher.bindings() {
        tracing::info!(
            "{} -> {} ({:?}, {}ms)",
            label,
            binding.action.description(),
            binding.mode,
            binding.cooldown_ms
        );
    }

    let mut pipeline = GesturePipeline::new(model, smoother, dispatcher);
    tracing::info!("Press Ctrl+C to stop");

    let mut last = None;
    pipeline.run(feed, &STOP_REQUESTED, target_fps, |frame: &FrameState| {
        if last != Some(frame.state) {
            tracing::info!("{:?} (confidence {:.2})", frame.state, frame.confidence);
            last = Some(frame.state);
        }
        if let Some(fired) = frame.dispatched {
            tracing::info!("{} -> {}", fired.label, fired.action.description());
        }
    })?;

    Ok(())
}

fn train(config: &Config) -> Result<()> {
    let dataset = Dataset::load(&config.paths.data_dir).context("Failed to read training data")?;
    if dataset.is_empty() {
        bail!(
            "No training data in {}; run `collect` first",
            config.paths.data_dir.display()
        );
    }
    if dataset.skipped > 0 {
        tracing::warn!("{} sample files were skipped", dataset.skipped);
    }
    for (label, count) in dataset.counts() {
        tracing::info!("{}: {} samples", label, count);
    }

    let (train_set, test_set) = dataset.train_test_split(config.training.test_split, config.training.seed);
    tracing::info!(
        "Training samples: {}, testing samples: {}, features per sample: {}",
        train_set.len(),
        test_set.len(),
        features::FEATURE_LEN
    );

    let mut classifier = GestureClassifier::new(config.classifier.clone());
    let model = classifier.train(&train_set.samples, &train_set.labels)?;

    if !test_set.is_empty() {
        let accuracy = model.accuracy(&test_set.samples, &test_set.labels)?;
        tracing::info!("Test accuracy: {:.2}%", accuracy * 100.0);
    }

    let base = config.paths.model_base();
    classifier
        .save(&base)
        .with_context(|| format!("Failed to save model to {}", base.display()))?;
    Ok(())
}

fn collect(
    config: &Config,
    feed: &mut dyn LandmarkSource,
    label: GestureLabel,
    samples: usize,
    interval: Duration,
) -> Result<()> {
    let mut writer = SampleWriter::new(&config.paths.data_dir, label)?;
    tracing::info!(
        "Collecting {} samples of {} into {}, one every {}ms while a hand is visible",
        samples,
        label,
        writer.dir().display(),
        interval.as_millis()
    );

    let mut saved = 0;
    let mut last_capture: Option<Instant> = None;
    while saved < samples && !STOP_REQUESTED.load(Ordering::Relaxed) {
        let Some(observation) = feed.next_frame() else {
            break;
        };
        let Some(hand) = observation.hand() else {
            continue;
        };
        let now = Instant::now();
        if last_capture.is_some_and(|t| now.duration_since(t) < interval) {
            continue;
        }

        let vector = features::extract(hand);
        let n = writer.save(&vector, hand)?;
        saved += 1;
        last_capture = Some(now);
        tracing::info!("Saved sample {} ({}/{})", n, saved, samples);
    }

    tracing::info!("Collected {} samples of {}", saved, label);
    Ok(())
}
