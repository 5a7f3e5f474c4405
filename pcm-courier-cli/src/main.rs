mod progress;
mod s3_store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use pcm_courier_core::models::config::{DEFAULT_TARGET_BYTES, DEFAULT_THRESHOLD_BYTES};
use pcm_courier_core::processing::wav_format::write_package_wav;
use pcm_courier_core::{
    read_key_file, Aggregator, BlockSource, Coordinator, CourierError, Credentials, DirectoryStore, FlushPolicy,
    LiveConfig, LiveSource, ObjectStore, PackageTemplate, PipelineConfig, RetryPolicy, SourcePoll, Spool,
    StorageClass, Uploader, WavFileSource,
};
use pcm_courier_cpal::{list_input_devices, CpalCapture, DeviceSelector};

use crate::progress::LogProgress;
use crate::s3_store::S3Store;

/// Chunk audio into timestamped packages and ship them to S3.
#[derive(Debug, Parser)]
#[command(name = "pcm-courier", version, about)]
struct Cli {
    /// Two-line credential file: access key, then secret key.
    #[arg(long, global = true, default_value = "s3sak.txt")]
    s3_cred: PathBuf,

    #[arg(long, global = true, default_value = "us-east-2")]
    s3_region: String,

    #[arg(long, global = true, default_value = "audio248")]
    s3_bucket: String,

    /// STANDARD, STANDARD_IA, GLACIER or REDUCED_REDUNDANCY.
    #[arg(long, global = true, default_value = "GLACIER")]
    s3_storage_class: StorageClass,

    /// S3-compatible endpoint URL (path-style requests).
    #[arg(long, global = true)]
    s3_endpoint: Option<String>,

    /// Write objects under this directory instead of S3.
    #[arg(long, global = true)]
    local_store: Option<PathBuf>,

    /// Encrypt packages with the first 32 bytes of this file.
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Where packages that could not be delivered are kept.
    #[arg(long, global = true, default_value = "spool")]
    spool_dir: PathBuf,

    /// Upload attempts per package before it is spooled (0 = retry forever).
    #[arg(long, global = true, default_value_t = 8)]
    max_attempts: u32,

    #[command(subcommand)]
    command: Command,
}

/// Metadata stamped on every package of a stream.
#[derive(Debug, Args)]
struct StreamArgs {
    /// Stream identifier, also the last part of every storage key.
    #[arg(long)]
    id: String,

    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a WAV file, then delete it once every package is delivered.
    UploadFile {
        path: PathBuf,

        #[command(flatten)]
        stream: StreamArgs,

        /// Approximate bytes per package.
        #[arg(long, default_value_t = DEFAULT_TARGET_BYTES)]
        target_bytes: usize,

        /// Keep the file after a complete upload.
        #[arg(long)]
        keep_source: bool,

        /// Epoch seconds of the first frame (default: file creation time).
        #[arg(long)]
        start_timestamp: Option<f64>,
    },
    /// Capture from an input device until interrupted.
    Live {
        #[command(flatten)]
        stream: StreamArgs,

        /// Device index or name (see `devices`).
        #[arg(long)]
        device: Option<String>,

        #[arg(long, default_value_t = 48000)]
        rate: u32,

        #[arg(long, default_value_t = 1.0)]
        block_secs: f64,

        /// A package is sent once more than this many bytes are buffered.
        #[arg(long, default_value_t = DEFAULT_THRESHOLD_BYTES)]
        threshold_bytes: usize,

        /// Also send a package once its oldest audio is this many seconds old.
        #[arg(long)]
        max_buffer_secs: Option<f64>,

        /// Blocks queued between capture and upload.
        #[arg(long, default_value_t = 256)]
        queue_capacity: usize,

        /// Write the first package to this WAV file and exit without uploading.
        #[arg(long)]
        write_test_wave: Option<PathBuf>,
    },
    /// Re-send packages kept in the spool directory.
    Redrive,
    /// List input devices.
    Devices,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CourierError> {
    match &cli.command {
        Command::Devices => {
            let devices = list_input_devices();
            if devices.is_empty() {
                println!("no input devices found");
            }
            for device in devices {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{:>3}  {}{}", device.index, device.name, marker);
            }
            Ok(())
        }
        Command::Redrive => {
            let spool = Spool::open(&cli.spool_dir)?;
            let uploader = Uploader::new(open_store(&cli)?, cli.s3_bucket.clone(), cli.s3_storage_class, retry_policy(&cli));
            let summary = uploader.redrive(&spool)?;
            log::info!(
                "redrive finished: {} delivered, {} still failing, {} skipped",
                summary.delivered,
                summary.failed,
                summary.skipped
            );
            if summary.failed > 0 || summary.skipped > 0 {
                return Err(CourierError::Spool(format!(
                    "{} package(s) remain in {}",
                    summary.failed + summary.skipped,
                    cli.spool_dir.display()
                )));
            }
            Ok(())
        }
        Command::UploadFile {
            path,
            stream: stream_args,
            target_bytes,
            keep_source,
            start_timestamp,
        } => {
            let config = pipeline_config(&cli, stream_args, None, None)?;
            let store = open_store(&cli)?;
            let mut source = WavFileSource::open_with_target(path, *target_bytes)?.keep_source(*keep_source);
            if let Some(ts) = start_timestamp {
                source = source.with_start_timestamp(*ts);
            }
            let running = install_interrupt_handler()?;
            stream(config, store, &mut source, &running)
        }
        Command::Live {
            stream: stream_args,
            device,
            rate,
            block_secs,
            threshold_bytes,
            max_buffer_secs,
            queue_capacity,
            write_test_wave,
        } => {
            let block_duration = positive_secs("--block-secs", *block_secs)?;
            let max_buffer_age = max_buffer_secs
                .map(|secs| positive_secs("--max-buffer-secs", secs))
                .transpose()?;
            let live = LiveConfig {
                sample_rate: *rate,
                block_duration,
                queue_capacity: *queue_capacity,
                ..LiveConfig::default()
            };

            let capture = CpalCapture::new(DeviceSelector::parse(device.as_deref()))?;
            let running = install_interrupt_handler()?;

            if let Some(path) = write_test_wave {
                let source = LiveSource::start(Box::new(capture), live, Arc::clone(&running))?;
                return write_test_wave_file(stream_args, source, *threshold_bytes, path, &running);
            }

            let config = pipeline_config(&cli, stream_args, Some(*threshold_bytes), max_buffer_age)?;
            let store = open_store(&cli)?;
            let mut source = LiveSource::start(Box::new(capture), live, Arc::clone(&running))?;
            log::info!("capturing from {}; press Ctrl-C to stop", source.device().name);
            stream(config, store, &mut source, &running)
        }
    }
}

fn stream(
    config: PipelineConfig,
    store: Box<dyn ObjectStore>,
    source: &mut dyn BlockSource,
    running: &AtomicBool,
) -> Result<(), CourierError> {
    let mut coordinator = Coordinator::new(config, store)?;
    coordinator.set_delegate(Arc::new(LogProgress::default()));
    let summary = coordinator.run(source, running)?;
    if summary.packages_abandoned > 0 {
        return Err(CourierError::Store(format!(
            "{} package(s) could not be delivered; run `pcm-courier redrive` to retry",
            summary.packages_abandoned
        )));
    }
    Ok(())
}

fn retry_policy(cli: &Cli) -> RetryPolicy {
    let max_attempts = match cli.max_attempts {
        0 => None,
        n => Some(n),
    };
    RetryPolicy::default().with_max_attempts(max_attempts)
}

fn pipeline_config(
    cli: &Cli,
    stream: &StreamArgs,
    threshold_bytes: Option<usize>,
    max_buffer_age: Option<Duration>,
) -> Result<PipelineConfig, CourierError> {
    let encryption_key = cli.key_file.as_deref().map(read_key_file).transpose()?;
    Ok(PipelineConfig {
        bucket: cli.s3_bucket.clone(),
        storage_class: cli.s3_storage_class,
        threshold_bytes: threshold_bytes.unwrap_or(DEFAULT_THRESHOLD_BYTES),
        max_buffer_age,
        retry: retry_policy(cli),
        spool_dir: Some(cli.spool_dir.clone()),
        encryption_key,
        ..PipelineConfig::new(stream.id.clone(), stream.description.clone())
    })
}

fn open_store(cli: &Cli) -> Result<Box<dyn ObjectStore>, CourierError> {
    if let Some(ref root) = cli.local_store {
        log::info!("writing objects under {}", root.display());
        return Ok(Box::new(DirectoryStore::new(root)));
    }
    let credentials = Credentials::from_file(&cli.s3_cred)?;
    Ok(Box::new(S3Store::new(credentials, cli.s3_region.clone(), cli.s3_endpoint.as_deref())?))
}

/// Shared "running" flag, cleared on the first Ctrl-C.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>, CourierError> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        if flag.swap(false, Ordering::SeqCst) {
            log::info!("interrupted; finishing the current package");
        }
    })
    .map_err(|e| CourierError::ConfigurationFailed(format!("failed to install Ctrl-C handler: {}", e)))?;
    Ok(running)
}

fn positive_secs(flag: &str, secs: f64) -> Result<Duration, CourierError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(CourierError::ConfigurationFailed(format!(
            "{} must be a positive number of seconds",
            flag
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Capture until one package is aggregated, write it as WAV, then stop.
fn write_test_wave_file(
    stream: &StreamArgs,
    mut source: LiveSource,
    threshold_bytes: usize,
    path: &Path,
    running: &AtomicBool,
) -> Result<(), CourierError> {
    let template = PackageTemplate {
        id: stream.id.clone(),
        description: stream.description.clone(),
        format: source.format(),
    };
    let mut aggregator = Aggregator::new(FlushPolicy::threshold(threshold_bytes), template);
    log::info!("capturing one package ({} bytes) for {}", threshold_bytes, path.display());

    let package = loop {
        match source.next_block(None)? {
            SourcePoll::Block(block) => {
                if let Some(package) = aggregator.push(block) {
                    break Some(package);
                }
            }
            SourcePoll::Idle => {}
            SourcePoll::Exhausted => break aggregator.finish(),
        }
    };
    running.store(false, Ordering::SeqCst);
    drop(source);

    match package {
        Some(package) => {
            write_package_wav(&package, path)?;
            log::info!("wrote {:.1}s of audio to {}", package.duration_secs(), path.display());
            Ok(())
        }
        None => Err(CourierError::CaptureFailed("no audio was captured".into())),
    }
}
