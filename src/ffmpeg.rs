//! ffmpeg/ffprobe subprocess backend.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::encoder::{CancelToken, EncodeRequest, Encoder};
use crate::error::JobError;
use crate::progress;

/// Directory searched for a bundled ffmpeg build.
pub const BUNDLED_DIR: &str = "ffmpeg_bin";

const STDERR_TAIL_LINES: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Encoder backed by the ffmpeg command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    video_codec: String,
    audio_codec: String,
    preset: String,
}

impl FfmpegEncoder {
    /// Resolve both binaries from `settings`, a bundled copy, or `PATH`.
    pub fn from_settings(settings: &Settings) -> Result<Self, JobError> {
        let ffmpeg_path = locate("ffmpeg", settings.ffmpeg_path.as_deref())?;
        let ffprobe_path = locate("ffprobe", settings.ffprobe_path.as_deref())?;
        info!(ffmpeg = %ffmpeg_path.display(), ffprobe = %ffprobe_path.display(), "using encoder");

        Ok(Self::with_paths(ffmpeg_path, ffprobe_path, settings))
    }

    /// Use the given binaries as-is, without checking they exist.
    pub fn with_paths(ffmpeg_path: PathBuf, ffprobe_path: PathBuf, settings: &Settings) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            video_codec: settings.video_codec.clone(),
            audio_codec: settings.audio_codec.clone(),
            preset: settings.encoder_preset.clone(),
        }
    }

    /// Arguments passed to ffmpeg for `request`.
    pub fn build_args(&self, request: &EncodeRequest) -> Vec<OsString> {
        let video = request.video_bitrate.to_string();
        let bufsize = request.video_bitrate.saturating_mul(2).to_string();
        let audio = request.audio_bitrate.to_string();

        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(request.input.clone().into_os_string());
        for arg in [
            "-c:v",
            self.video_codec.as_str(),
            "-preset",
            self.preset.as_str(),
            "-b:v",
            video.as_str(),
            "-maxrate",
            video.as_str(),
            "-bufsize",
            bufsize.as_str(),
            "-c:a",
            self.audio_codec.as_str(),
            "-b:a",
            audio.as_str(),
            "-movflags",
            "+faststart",
        ] {
            args.push(OsString::from(arg));
        }
        args.push(request.output.clone().into_os_string());
        args
    }

    fn spawn(&self, request: &EncodeRequest) -> Result<Child, JobError> {
        let args = self.build_args(request);
        debug!(program = %self.ffmpeg_path.display(), ?args, "spawning ffmpeg");

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group: a terminal Ctrl-C must reach us, not ffmpeg.
        // The cancel token is the only thing that stops the encoder.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd.spawn()
            .map_err(|e| spawn_error("ffmpeg", &self.ffmpeg_path, e))
    }
}

impl Encoder for FfmpegEncoder {
    fn probe_duration(&self, input: &Path) -> Result<f64, JobError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error("ffprobe", &self.ffprobe_path, e))?;

        if !output.status.success() {
            return Err(JobError::invalid(format!(
                "could not read video duration: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    fn encode(
        &self,
        request: &EncodeRequest,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), JobError> {
        let mut child = self.spawn(request)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| JobError::Io("ffmpeg stderr was not captured".to_string()))?;
        let (line_tx, line_rx) = unbounded::<String>();
        let reader = thread::spawn(move || {
            let _ = progress::for_each_line(BufReader::new(stderr), |line| {
                let _ = line_tx.send(line);
            });
        });

        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        loop {
            if cancel.is_cancelled() {
                info!("cancelling ffmpeg");
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Err(JobError::CancelledByUser);
            }

            match line_rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if let Some(seconds) = progress::parse_time(&line) {
                        on_progress(seconds);
                    } else {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // stderr closed: the process has exited or is about to
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let _ = reader.join();
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else if cancel.is_cancelled() {
            // Cancelled while the process was already on its way out.
            Err(JobError::CancelledByUser)
        } else {
            let stderr = Vec::from(tail).join("\n");
            warn!(code = ?status.code(), "ffmpeg failed");
            Err(JobError::EncodingFailed {
                code: status.code(),
                stderr,
            })
        }
    }
}

/// Parse ffprobe's bare `format=duration` output.
pub fn parse_duration(stdout: &str) -> Result<f64, JobError> {
    let text = stdout.trim();
    let duration: f64 = text
        .parse()
        .map_err(|_| JobError::invalid(format!("could not read video duration from {:?}", text)))?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(JobError::invalid(format!("video duration is {}", duration)));
    }
    Ok(duration)
}

/// Find `name`: explicit path, then bundled directory, then `PATH`.
pub fn locate(name: &str, explicit: Option<&Path>) -> Result<PathBuf, JobError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        // Bare names like "ffmpeg7" are looked up on PATH.
        return which::which(path).map_err(|_| {
            JobError::EncoderNotFound(format!("{} at {}", name, path.display()))
        });
    }

    for dir in bundled_dirs() {
        let candidate = dir.join(executable_name(name));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    which::which(name).map_err(|_| JobError::EncoderNotFound(name.to_string()))
}

fn bundled_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join(BUNDLED_DIR));
    }
    dirs.push(PathBuf::from(BUNDLED_DIR));
    dirs
}

fn executable_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

fn spawn_error(name: &str, path: &Path, err: io::Error) -> JobError {
    if err.kind() == io::ErrorKind::NotFound {
        JobError::EncoderNotFound(format!("{} at {}", name, path.display()))
    } else {
        JobError::Io(format!("failed to start {}: {}", name, err))
    }
}
