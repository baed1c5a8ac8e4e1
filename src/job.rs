//! The encoding job record and its lifecycle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::bitrate::TargetSize;
use crate::error::JobError;

/// Input files the file picker offers by default.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// Unique identifier for an encoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        JobId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status of an encoding job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Submitted, worker not yet running
    Pending,
    /// Reading the input duration
    Probing,
    /// Encoder running; `progress` is a fraction in `[0, 1]`
    Encoding { progress: f64, started_at: Instant },
    Completed { output_size: u64, elapsed: Duration },
    Failed { error: JobError },
    Cancelled,
}

impl JobStatus {
    /// Complete, failed or cancelled.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }

    pub fn display(&self) -> String {
        match self {
            JobStatus::Pending => "Pending".to_string(),
            JobStatus::Probing => "Probing".to_string(),
            JobStatus::Encoding { progress, .. } => format!("{:.1}%", progress * 100.0),
            JobStatus::Completed { elapsed, .. } => {
                format!("Done ({:.1}s)", elapsed.as_secs_f64())
            }
            JobStatus::Failed { error } => format!("Failed: {}", error),
            JobStatus::Cancelled => "Cancelled".to_string(),
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub target: TargetSize,
    /// Audio bitrate reserved out of the target, in bps
    pub audio_bitrate: u64,
}

impl JobRequest {
    /// Reject requests that can never succeed.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.target.bytes() == 0 {
            return Err(JobError::invalid("target size must be positive"));
        }
        if !self.input_path.exists() {
            return Err(JobError::invalid(format!(
                "input file {} does not exist",
                self.input_path.display()
            )));
        }
        if !self.input_path.is_file() {
            return Err(JobError::invalid(format!(
                "input {} is not a file",
                self.input_path.display()
            )));
        }
        if same_file(&self.input_path, &self.output_path) {
            return Err(JobError::invalid("output path must differ from the input path"));
        }
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Default output: `<dir>/<stem>_<label>.mp4`, where `dir` is `output_dir`
/// or the input's own directory.
pub fn default_output_path(input: &Path, output_dir: Option<&Path>, target: TargetSize) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    dir.join(format!("{}_{}.mp4", stem, target.label()))
}

/// Whether `path` has one of [`VIDEO_EXTENSIONS`].
pub fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// One compress-and-export request and everything learned while running it.
#[derive(Debug, Clone)]
pub struct EncodingJob {
    pub id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub target_size_bytes: u64,
    pub audio_bitrate: u64,
    /// Known once the input has been probed
    pub duration_seconds: Option<f64>,
    /// Video bitrate in bps, known once the input has been probed
    pub computed_bitrate: Option<u64>,
    pub status: JobStatus,
}

impl EncodingJob {
    pub fn new(id: JobId, request: &JobRequest) -> Self {
        Self {
            id,
            input_path: request.input_path.clone(),
            output_path: request.output_path.clone(),
            target_size_bytes: request.target.bytes(),
            audio_bitrate: request.audio_bitrate,
            duration_seconds: None,
            computed_bitrate: None,
            status: JobStatus::Pending,
        }
    }

    pub fn start_probing(&mut self) {
        if matches!(self.status, JobStatus::Pending) {
            self.status = JobStatus::Probing;
        }
    }

    /// Record probe results and move to encoding.
    pub fn start_encoding(&mut self, duration_seconds: f64, video_bitrate: u64) {
        if self.status.is_finished() {
            return;
        }
        self.duration_seconds = Some(duration_seconds);
        self.computed_bitrate = Some(video_bitrate);
        self.status = JobStatus::Encoding {
            progress: 0.0,
            started_at: Instant::now(),
        };
    }

    /// Progress never moves backwards.
    pub fn update_progress(&mut self, fraction: f64) {
        if let JobStatus::Encoding { progress, .. } = &mut self.status {
            let fraction = fraction.clamp(0.0, 1.0);
            if fraction > *progress {
                *progress = fraction;
            }
        }
    }

    pub fn complete(&mut self, output_size: u64) {
        let elapsed = match &self.status {
            JobStatus::Encoding { started_at, .. } => started_at.elapsed(),
            JobStatus::Pending | JobStatus::Probing => Duration::ZERO,
            _ => return,
        };
        self.status = JobStatus::Completed {
            output_size,
            elapsed,
        };
    }

    pub fn fail(&mut self, error: JobError) {
        if self.status.is_finished() {
            return;
        }
        self.status = if error.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed { error }
        };
    }

    pub fn cancel(&mut self) {
        if !self.status.is_finished() {
            self.status = JobStatus::Cancelled;
        }
    }
}
