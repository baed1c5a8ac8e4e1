//! Errors surfaced at the job boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can end a job without producing an output file.
///
/// The type is `Clone` so it can travel inside worker events; I/O errors are
/// captured by message for the same reason.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} not found. Install FFmpeg or place it in ffmpeg_bin/")]
    EncoderNotFound(String),
    #[error("encoder exited with {}: {}", exit_code_display(.code), .stderr)]
    EncodingFailed { code: Option<i32>, stderr: String },
    #[error("encoder reported success but {} was not written", .0.display())]
    OutputMissing(PathBuf),
    #[error("cancelled by user")]
    CancelledByUser,
    #[error("a job is already in progress")]
    JobInProgress,
    #[error("I/O error: {0}")]
    Io(String),
}

impl JobError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        JobError::InvalidInput(msg.into())
    }

    /// Whether this error means the user stopped the job.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::CancelledByUser)
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Io(err.to_string())
    }
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}
