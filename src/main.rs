use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use velvet_recorder::audio::{AmplitudeFrame, CpalDevice, RecordingSession};
use velvet_recorder::conf::{Settings, config_path};

/// Redraw interval for the level meter (~30 fps)
const METER_TICK: Duration = Duration::from_millis(33);
const METER_WIDTH: usize = 32;

#[derive(Parser)]
#[command(name = "velvet-recorder")]
#[command(about = "Record voice messages from the microphone to WAV")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio recording devices
    Devices {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Record until Ctrl-C or the duration elapses, then write a WAV file
    Record {
        /// Output WAV path (defaults to a timestamped file in the recordings directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Discard the take after this many seconds instead of saving it
        #[arg(long, conflicts_with = "duration")]
        cancel_after: Option<u64>,

        /// Input device name (see `devices`)
        #[arg(long)]
        device: Option<String>,

        /// Sample rate in Hz (defaults to the device's native rate)
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the format and length of a WAV file
    Inspect {
        path: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the config file location and effective settings
    Config {
        /// Write the effective settings to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Stop,
    Cancel,
}

struct RecordOptions {
    output: Option<PathBuf>,
    duration: Option<u64>,
    cancel_after: Option<u64>,
    device: Option<String>,
    sample_rate: Option<u32>,
    format: OutputFormat,
}

/// Render a level meter line from an amplitude frame
fn render_meter(frame: &AmplitudeFrame, width: usize) -> String {
    let filled = ((frame.level() * width as f32).round() as usize).min(width);
    format!(
        "[{}{}] peak {:>3}",
        "█".repeat(filled),
        "░".repeat(width - filled),
        frame.peak()
    )
}

fn list_devices(format: OutputFormat) -> Result<()> {
    let devices = CpalDevice::list_devices().context("Failed to list audio devices")?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("Available Audio Devices:");
    println!(
        "{:<30} {:<10} {:<20} Formats",
        "Name", "Default", "Sample Rates"
    );
    println!("{}", "-".repeat(80));

    for device in devices {
        let default_str = if device.is_default { "YES" } else { "NO" };
        let sample_rates = device
            .supported_sample_rates
            .iter()
            .take(3)
            .map(|sr| sr.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let formats = device
            .supported_formats
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let name: String = device.name.chars().take(30).collect();

        println!(
            "{:<30} {:<10} {:<20} {}",
            name, default_str, sample_rates, formats
        );
    }

    Ok(())
}

async fn record(settings: &Settings, options: RecordOptions) -> Result<()> {
    let device = CpalDevice::new()
        .with_device_name(options.device.or_else(|| settings.audio_device.clone()))
        .with_sample_rate(options.sample_rate.or(settings.sample_rate))
        .with_chunk_size(settings.chunk_size);
    let mut session = RecordingSession::new(device, settings.analyser_config()?)?;

    session.start()?;
    log::debug!("Session {} started", session.id());

    let meter = ProgressBar::new_spinner();
    meter.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.red} {elapsed} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let stop_after = options.duration.map(Duration::from_secs);
    let cancel_after = options.cancel_after.map(Duration::from_secs);
    let mut ticker = tokio::time::interval(METER_TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let finish = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Finish::Stop,
            _ = ticker.tick() => {
                if let Some(frame) = session.amplitude_frame() {
                    meter.set_message(render_meter(&frame, METER_WIDTH));
                    meter.tick();
                }
                let elapsed = session.elapsed().unwrap_or_default();
                if cancel_after.is_some_and(|limit| elapsed >= limit) {
                    break Finish::Cancel;
                }
                if stop_after.is_some_and(|limit| elapsed >= limit) {
                    break Finish::Stop;
                }
            }
        }
    };
    meter.finish_and_clear();

    if finish == Finish::Cancel {
        session.cancel()?;
        println!("Recording discarded");
        return Ok(());
    }

    let artifact = session.stop()?;
    let path = match options.output {
        Some(path) => path,
        None => settings.recording_path()?,
    };
    artifact
        .write_to(&path)
        .with_context(|| format!("Failed to write recording to {}", path.display()))?;

    match options.format {
        OutputFormat::Text => {
            println!(
                "Saved {:.1}s at {} Hz to {}",
                artifact.duration().as_secs_f32(),
                artifact.sample_rate(),
                path.display()
            );
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": path,
                "duration": artifact.duration().as_secs_f32(),
                "sample_rate": artifact.sample_rate(),
                "samples": artifact.sample_count(),
                "bytes": artifact.len(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

fn inspect(path: &Path, format: OutputFormat) -> Result<()> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();
    let frames = reader.duration();
    let seconds = f64::from(frames) / f64::from(spec.sample_rate.max(1));

    let peak = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let mut peak = 0u16;
            for sample in reader.samples::<i16>() {
                peak = peak.max(sample?.unsigned_abs());
            }
            Some(f32::from(peak) / 32768.0)
        }
        _ => None,
    };

    match format {
        OutputFormat::Text => {
            println!("File:            {}", path.display());
            println!("Channels:        {}", spec.channels);
            println!("Sample rate:     {} Hz", spec.sample_rate);
            println!("Bits per sample: {}", spec.bits_per_sample);
            println!("Duration:        {:.2}s", seconds);
            match peak {
                Some(peak) => println!("Peak level:      {:.3}", peak),
                None => println!("Peak level:      n/a"),
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": path,
                "channels": spec.channels,
                "sample_rate": spec.sample_rate,
                "bits_per_sample": spec.bits_per_sample,
                "duration": seconds,
                "peak": peak,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

fn show_config(settings: &Settings, init: bool) -> Result<()> {
    let path = config_path().ok_or_else(|| anyhow!("Could not determine config directory"))?;

    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            settings.save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
    } else {
        println!("# {}", path.display());
    }
    print!("{}", settings.to_toml()?);
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let settings = Settings::load();

    let result = match cli.command {
        Commands::Devices { format } => list_devices(format),
        Commands::Record {
            output,
            duration,
            cancel_after,
            device,
            sample_rate,
            format,
        } => {
            let options = RecordOptions {
                output,
                duration,
                cancel_after,
                device,
                sample_rate,
                format,
            };
            record(&settings, options).await
        }
        Commands::Inspect { path, format } => inspect(&path, format),
        Commands::Config { init } => show_config(&settings, init),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
