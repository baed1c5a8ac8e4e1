//! The encoder capability the job worker drives.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::JobError;

/// Parameters for one encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Video bitrate in bits per second
    pub video_bitrate: u64,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u64,
}

/// Shared flag used to stop a running encode.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something that can measure and re-encode a video.
///
/// Implementations must return [`JobError::CancelledByUser`] promptly once
/// `cancel` is set and must not leave a child process running.
pub trait Encoder: Send + Sync {
    /// Duration of `input` in seconds.
    fn probe_duration(&self, input: &Path) -> Result<f64, JobError>;

    /// Encode `request.input` into `request.output`, reporting the encoded
    /// timestamp (seconds) through `on_progress`.
    fn encode(
        &self,
        request: &EncodeRequest,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), JobError>;
}
