use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{info, warn};

mod bitrate;
mod config;
mod controller;
mod encoder;
mod error;
mod ffmpeg;
mod job;
mod logging;
mod progress;
mod report;

use bitrate::{SizePreset, TargetSize};
use config::Settings;
use controller::JobController;
use encoder::Encoder;
use ffmpeg::FfmpegEncoder;
use job::JobRequest;
use report::Reporter;

/// Re-encode a video with ffmpeg so it fits under an upload size limit.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("target").args(["target_bytes", "target_mb", "preset"])))]
struct Args {
    /// Input video file.
    input: PathBuf,
    /// Output file. Defaults to `<input stem>_<size>.mp4`.
    output: Option<PathBuf>,
    /// Target file size in bytes.
    #[arg(long)]
    target_bytes: Option<u64>,
    /// Target file size in MiB.
    #[arg(long)]
    target_mb: Option<u64>,
    /// Common upload limit in MiB (default 10).
    #[arg(long, value_enum)]
    preset: Option<SizePreset>,
    /// Audio bitrate (bps) reserved out of the target.
    #[arg(long)]
    audio_bitrate: Option<u64>,
    /// Directory for the generated output name.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// ffmpeg binary to use.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
    /// ffprobe binary to use.
    #[arg(long)]
    ffprobe: Option<PathBuf>,
    /// Video codec passed to ffmpeg (default libx264).
    #[arg(long)]
    video_codec: Option<String>,
    /// Audio codec passed to ffmpeg (default aac).
    #[arg(long)]
    audio_codec: Option<String>,
    /// Encoder speed preset (e.g. veryfast, medium, slow).
    #[arg(long)]
    encoder_preset: Option<String>,
    /// Settings file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the computed bitrate without encoding.
    #[arg(long)]
    dry_run: bool,
    /// Hide the progress bar.
    #[arg(long)]
    no_progress: bool,
    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn target(&self) -> TargetSize {
        if let Some(bytes) = self.target_bytes {
            TargetSize::from_bytes(bytes)
        } else if let Some(mb) = self.target_mb {
            TargetSize::from_mib(mb)
        } else {
            self.preset.unwrap_or(SizePreset::Discord10).target()
        }
    }

    /// CLI flags win over file and environment settings.
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(path) = &self.ffmpeg {
            settings.ffmpeg_path = Some(path.clone());
        }
        if let Some(path) = &self.ffprobe {
            settings.ffprobe_path = Some(path.clone());
        }
        if let Some(bitrate) = self.audio_bitrate {
            settings.audio_bitrate = bitrate;
        }
        if let Some(codec) = &self.video_codec {
            settings.video_codec = codec.clone();
        }
        if let Some(codec) = &self.audio_codec {
            settings.audio_codec = codec.clone();
        }
        if let Some(preset) = &self.encoder_preset {
            settings.encoder_preset = preset.clone();
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = Some(dir.clone());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply_to(&mut settings);

    let target = args.target();
    let output = args.output.clone().unwrap_or_else(|| {
        job::default_output_path(&args.input, settings.output_dir.as_deref(), target)
    });
    if !job::has_video_extension(&args.input) {
        warn!(input = %args.input.display(), "input does not look like a video file");
    }

    let encoder = match FfmpegEncoder::from_settings(&settings) {
        Ok(encoder) => encoder,
        Err(e) => {
            eprintln!("{}", report::failure_message(&e));
            std::process::exit(1);
        }
    };

    let request = JobRequest {
        input_path: args.input.clone(),
        output_path: output,
        target,
        audio_bitrate: settings.audio_bitrate,
    };

    if args.dry_run {
        return dry_run(&encoder, &request);
    }

    let code = run(Arc::new(encoder), request, !args.no_progress)?;
    std::process::exit(code);
}

fn dry_run(encoder: &dyn Encoder, request: &JobRequest) -> Result<()> {
    let outcome = request.validate().and_then(|_| {
        let duration = encoder.probe_duration(&request.input_path)?;
        let video = bitrate::video_bitrate(duration, request.target, request.audio_bitrate)?;
        Ok((duration, video))
    });

    match outcome {
        Ok((duration, video)) => {
            println!("input:         {}", request.input_path.display());
            println!("duration:      {:.2}s", duration);
            println!("target:        {}", report::format_bytes(request.target.bytes()));
            println!("video bitrate: {} ({} bps)", report::format_bitrate(video), video);
            println!("audio bitrate: {}", report::format_bitrate(request.audio_bitrate));
            println!("output:        {}", request.output_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", report::failure_message(&e));
            std::process::exit(1);
        }
    }
}

/// Submit the job, forward Ctrl-C as cancellation, and report the outcome.
fn run(encoder: Arc<dyn Encoder>, request: JobRequest, show_progress: bool) -> Result<i32> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut controller = JobController::new(encoder);
    if let Err(e) = controller.submit(request) {
        eprintln!("{}", report::failure_message(&e));
        return Ok(1);
    }

    let reporter = Reporter::new(show_progress);
    let mut cancel_sent = false;
    while controller.is_busy() {
        if interrupted.load(Ordering::SeqCst) && !cancel_sent {
            controller.cancel();
            cancel_sent = true;
        }
        if let Some(event) = controller.wait_event(Duration::from_millis(100)) {
            reporter.on_event(&event);
        }
    }

    let Some(job) = controller.current() else {
        return Ok(1);
    };
    info!(
        job = %job.id,
        input = %job.input_path.display(),
        status = %job.status.display(),
        duration = ?job.duration_seconds,
        video_bitrate = ?job.computed_bitrate,
        audio_bitrate = job.audio_bitrate,
        "job finished"
    );
    let message = report::summary(job);
    if report::exit_code(job) == 0 {
        println!("{}", message);
    } else {
        eprintln!("{}", message);
    }
    Ok(report::exit_code(job))
}
