//! Target size to bitrate arithmetic.

use crate::error::JobError;

pub const MIB: u64 = 1024 * 1024;

/// Default audio reservation in bits per second.
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;

/// Desired size of the encoded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    bytes: u64,
}

impl TargetSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    /// `mib` mebibytes, matching how upload limits are usually quoted.
    pub fn from_mib(mib: u64) -> Self {
        Self {
            bytes: mib.saturating_mul(MIB),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Short label used in generated file names, e.g. `10mb`.
    pub fn label(&self) -> String {
        if self.bytes > 0 && self.bytes % MIB == 0 {
            format!("{}mb", self.bytes / MIB)
        } else {
            format!("{}b", self.bytes)
        }
    }
}

/// Upload limits offered as one-click choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SizePreset {
    #[value(name = "10")]
    Discord10,
    #[value(name = "50")]
    Discord50,
    #[value(name = "500")]
    Discord500,
}

impl SizePreset {
    pub fn target(self) -> TargetSize {
        match self {
            SizePreset::Discord10 => TargetSize::from_mib(10),
            SizePreset::Discord50 => TargetSize::from_mib(50),
            SizePreset::Discord500 => TargetSize::from_mib(500),
        }
    }
}

/// Compute the video bitrate (bps) that makes `duration_seconds` of video plus
/// `audio_bitrate` of audio fit into `target`.
///
/// The result is never below 1 bps; a target too small to even hold the audio
/// still yields a valid (if useless) encode rather than an error.
pub fn video_bitrate(
    duration_seconds: f64,
    target: TargetSize,
    audio_bitrate: u64,
) -> Result<u64, JobError> {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return Err(JobError::invalid(format!(
            "video duration must be positive, got {}",
            duration_seconds
        )));
    }
    if target.bytes() == 0 {
        return Err(JobError::invalid("target size must be positive"));
    }

    let total = (target.bytes() as f64 * 8.0 / duration_seconds).floor();
    // Saturating float to int cast handles absurdly short durations.
    let total = total as u64;

    Ok(total.saturating_sub(audio_bitrate).max(1))
}
