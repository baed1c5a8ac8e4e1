//! Terminal reporting: progress bar while encoding, final outcome after.

use indicatif::{ProgressBar, ProgressStyle};

use crate::bitrate::MIB;
use crate::controller::JobEvent;
use crate::error::JobError;
use crate::job::{EncodingJob, JobStatus};

const BAR_LEN: u64 = 1000;

/// Drives a progress bar from job events.
pub struct Reporter {
    bar: ProgressBar,
}

impl Reporter {
    pub fn new(show_progress: bool) -> Self {
        let bar = if show_progress {
            ProgressBar::new(BAR_LEN)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    pub fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Started(_) => self.bar.set_message("probing"),
            JobEvent::Probed { video_bitrate, .. } => {
                self.bar
                    .set_message(format!("encoding at {}", format_bitrate(*video_bitrate)));
            }
            JobEvent::Progress(_, fraction) => {
                self.bar.set_position((fraction * BAR_LEN as f64) as u64);
            }
            JobEvent::Completed(..) => {
                self.bar.set_position(BAR_LEN);
                self.bar.finish_and_clear();
            }
            JobEvent::Failed(..) | JobEvent::Cancelled(_) => self.bar.abandon(),
        }
    }
}

/// Final message shown to the user.
pub fn summary(job: &EncodingJob) -> String {
    match &job.status {
        JobStatus::Completed {
            output_size,
            elapsed,
        } => {
            let mut line = format!(
                "Saved {} ({} of {} target",
                job.output_path.display(),
                format_bytes(*output_size),
                format_bytes(job.target_size_bytes),
            );
            if let Some(bps) = job.computed_bitrate {
                line.push_str(&format!(", video {}", format_bitrate(bps)));
            }
            line.push_str(&format!(") in {:.1}s", elapsed.as_secs_f64()));
            line
        }
        JobStatus::Failed { error } => failure_message(error),
        JobStatus::Cancelled => "Cancelled; partial output discarded".to_string(),
        other => other.display(),
    }
}

/// User-facing text for a job error, with a hint where one helps.
pub fn failure_message(error: &JobError) -> String {
    match error {
        JobError::EncoderNotFound(_) => format!(
            "Error: {}\nHint: pass --ffmpeg/--ffprobe or set CLIPSHRINK_FFMPEG",
            error
        ),
        _ => format!("Error: {}", error),
    }
}

/// Process exit code for a finished job.
pub fn exit_code(job: &EncodingJob) -> i32 {
    match job.status {
        JobStatus::Completed { .. } => 0,
        JobStatus::Cancelled => 130,
        _ => 1,
    }
}

/// Sizes use the same binary units as `--target-mb`, so a 10 MiB target
/// prints as `10.00 MiB` rather than a rounded decimal figure.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_bitrate(bps: u64) -> String {
    if bps >= 1_000_000 {
        format!("{:.2} Mbps", bps as f64 / 1_000_000.0)
    } else if bps >= 1_000 {
        format!("{:.0} kbps", bps as f64 / 1_000.0)
    } else {
        format!("{} bps", bps)
    }
}
