//! Layered settings: defaults, TOML file, environment, then CLI flags.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::bitrate::DEFAULT_AUDIO_BITRATE;

pub enum EnvKey {
    Ffmpeg,
    Ffprobe,
    AudioBitrate,
    OutputDir,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::Ffmpeg => "CLIPSHRINK_FFMPEG",
            EnvKey::Ffprobe => "CLIPSHRINK_FFPROBE",
            EnvKey::AudioBitrate => "CLIPSHRINK_AUDIO_BITRATE",
            EnvKey::OutputDir => "CLIPSHRINK_OUTPUT_DIR",
        }
    }
}

fn env_get(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(key: EnvKey) -> Option<T> {
    env_get(key).and_then(|v| v.parse().ok())
}

/// Effective settings for a run.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Explicit ffmpeg binary; discovered when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit ffprobe binary; discovered when unset
    pub ffprobe_path: Option<PathBuf>,
    /// Audio bitrate reserved out of the target, in bps
    pub audio_bitrate: u64,
    pub video_codec: String,
    pub audio_codec: String,
    /// x264/x265 speed preset
    pub encoder_preset: String,
    /// Where generated output names are placed; next to the input when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            audio_bitrate: DEFAULT_AUDIO_BITRATE,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            encoder_preset: "medium".to_string(),
            output_dir: None,
        }
    }
}

impl Settings {
    /// Load defaults, then the config file, then environment overrides.
    ///
    /// An explicitly requested file must exist; the per-user default file is
    /// optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings = Self::from_toml(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Some(path) = env_get(EnvKey::Ffmpeg) {
            self.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_get(EnvKey::Ffprobe) {
            self.ffprobe_path = Some(PathBuf::from(path));
        }
        if let Some(bitrate) = env_parsed(EnvKey::AudioBitrate) {
            self.audio_bitrate = bitrate;
        }
        if let Some(dir) = env_get(EnvKey::OutputDir) {
            self.output_dir = Some(PathBuf::from(dir));
        }
    }
}

/// `<config dir>/clipshrink/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("clipshrink").join("config.toml"))
}
