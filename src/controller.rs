//! Single-job controller with a background worker thread.
//!
//! The controller owns the only [`EncodingJob`]. The worker never touches it;
//! it reports through [`JobEvent`] messages that the controller applies when
//! the caller polls.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::bitrate;
use crate::encoder::{CancelToken, EncodeRequest, Encoder};
use crate::error::JobError;
use crate::job::{EncodingJob, JobId, JobRequest};
use crate::progress;

/// Messages from the worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Worker is probing the input
    Started(JobId),
    /// Duration known and bitrate computed; encoding begins
    Probed {
        id: JobId,
        duration_seconds: f64,
        video_bitrate: u64,
    },
    /// Fraction of the input encoded
    Progress(JobId, f64),
    /// Output written; carries its size in bytes
    Completed(JobId, u64),
    Failed(JobId, JobError),
    Cancelled(JobId),
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Started(id)
            | JobEvent::Progress(id, _)
            | JobEvent::Completed(id, _)
            | JobEvent::Failed(id, _)
            | JobEvent::Cancelled(id) => *id,
            JobEvent::Probed { id, .. } => *id,
        }
    }
}

struct ActiveWorker {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Runs at most one encoding job at a time.
pub struct JobController {
    encoder: Arc<dyn Encoder>,
    job: Option<EncodingJob>,
    worker: Option<ActiveWorker>,
    event_tx: Sender<JobEvent>,
    event_rx: Receiver<JobEvent>,
}

impl JobController {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            encoder,
            job: None,
            worker: None,
            event_tx,
            event_rx,
        }
    }

    /// Whether a job is submitted and not yet finished.
    pub fn is_busy(&self) -> bool {
        self.job
            .as_ref()
            .map(|job| !job.status.is_finished())
            .unwrap_or(false)
    }

    /// The current (or most recent) job.
    pub fn current(&self) -> Option<&EncodingJob> {
        self.job.as_ref()
    }

    /// Start a job, or reject it if one is still running.
    pub fn submit(&mut self, request: JobRequest) -> Result<JobId, JobError> {
        if self.is_busy() {
            warn!("rejecting submission: a job is already in progress");
            return Err(JobError::JobInProgress);
        }
        request.validate()?;
        self.reap_worker();

        let id = JobId::next();
        let cancel = CancelToken::new();
        let encoder = Arc::clone(&self.encoder);
        let events = self.event_tx.clone();
        let worker_request = request.clone();
        let worker_cancel = cancel.clone();

        info!(
            job = %id,
            input = %request.input_path.display(),
            output = %request.output_path.display(),
            target_bytes = request.target.bytes(),
            "submitting job"
        );

        let handle = thread::Builder::new()
            .name(format!("encode-{}", id.0))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_job(id, encoder.as_ref(), &worker_request, &worker_cancel, &events)
                }));
                let event = match outcome {
                    Ok(Ok(output_size)) => JobEvent::Completed(id, output_size),
                    Ok(Err(JobError::CancelledByUser)) => JobEvent::Cancelled(id),
                    Ok(Err(e)) => JobEvent::Failed(id, e),
                    Err(_) => {
                        error!(job = %id, "encoding worker panicked");
                        remove_partial_output(&worker_request.output_path);
                        JobEvent::Failed(id, JobError::Io("encoding worker panicked".to_string()))
                    }
                };
                let _ = events.send(event);
            })?;

        self.job = Some(EncodingJob::new(id, &request));
        self.worker = Some(ActiveWorker { cancel, handle });
        Ok(id)
    }

    /// Ask the running job to stop. No-op when idle.
    pub fn cancel(&self) {
        if let Some(worker) = &self.worker {
            if self.is_busy() {
                info!("cancelling current job");
                worker.cancel.cancel();
            }
        }
    }

    /// Wait up to `timeout` for the next event and apply it.
    pub fn wait_event(&mut self, timeout: Duration) -> Option<JobEvent> {
        loop {
            match self.event_rx.recv_timeout(timeout) {
                Ok(event) => {
                    if self.apply(&event) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Returns false for events from a job that is no longer current.
    fn apply(&mut self, event: &JobEvent) -> bool {
        let Some(job) = self.job.as_mut() else {
            return false;
        };
        if job.id != event.job_id() {
            debug!(stale = %event.job_id(), current = %job.id, "dropping stale event");
            return false;
        }

        match event {
            JobEvent::Started(_) => job.start_probing(),
            JobEvent::Probed {
                duration_seconds,
                video_bitrate,
                ..
            } => job.start_encoding(*duration_seconds, *video_bitrate),
            JobEvent::Progress(_, fraction) => job.update_progress(*fraction),
            JobEvent::Completed(_, size) => job.complete(*size),
            JobEvent::Failed(_, err) => job.fail(err.clone()),
            JobEvent::Cancelled(_) => job.cancel(),
        }
        true
    }

    fn reap_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                error!("encoding worker panicked");
            }
        }
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
        self.reap_worker();
    }
}

/// Worker body: probe, compute the bitrate, encode, verify the output.
fn run_job(
    id: JobId,
    encoder: &dyn Encoder,
    request: &JobRequest,
    cancel: &CancelToken,
    events: &Sender<JobEvent>,
) -> Result<u64, JobError> {
    let _ = events.send(JobEvent::Started(id));

    let duration = encoder.probe_duration(&request.input_path)?;
    let video_bitrate = bitrate::video_bitrate(duration, request.target, request.audio_bitrate)?;
    info!(job = %id, duration, video_bitrate, "probed input");
    let _ = events.send(JobEvent::Probed {
        id,
        duration_seconds: duration,
        video_bitrate,
    });

    if cancel.is_cancelled() {
        return Err(JobError::CancelledByUser);
    }

    let encode_request = EncodeRequest {
        input: request.input_path.clone(),
        output: request.output_path.clone(),
        video_bitrate,
        audio_bitrate: request.audio_bitrate,
    };
    let mut last_sent = 0.0;
    let result = encoder.encode(&encode_request, cancel, &mut |seconds: f64| {
        let fraction = progress::fraction(seconds, duration);
        // Throttle to 0.1% steps.
        if fraction - last_sent >= 0.001 {
            last_sent = fraction;
            let _ = events.send(JobEvent::Progress(id, fraction));
        }
    });

    if let Err(e) = result {
        remove_partial_output(&request.output_path);
        // An encoder killed by the same interrupt exits non-zero on its own.
        if cancel.is_cancelled() {
            return Err(JobError::CancelledByUser);
        }
        return Err(e);
    }

    match std::fs::metadata(&request.output_path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(JobError::OutputMissing(request.output_path.clone())),
    }
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove partial output: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrate::TargetSize;
    use crate::job::JobStatus;
    use crossbeam_channel::bounded;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// What the mock encoder does when asked to encode.
    enum Behaviour {
        /// Write `bytes` to the output and succeed
        Write(Vec<u8>),
        /// Write a partial file, then fail like ffmpeg exiting non-zero
        FailAfterPartial,
        /// Succeed without writing anything
        Vanish,
        /// Write a partial file and block until released or cancelled
        Block(Receiver<()>),
        /// Write a partial file and panic
        Panic,
        /// Cancel the job from inside the encoder, then exit like an interrupted ffmpeg
        InterruptedExit,
    }

    struct MockEncoder {
        duration: f64,
        behaviour: Behaviour,
        requests: Mutex<Vec<EncodeRequest>>,
    }

    impl MockEncoder {
        fn new(duration: f64, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                duration,
                behaviour,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl Encoder for MockEncoder {
        fn probe_duration(&self, _input: &Path) -> Result<f64, JobError> {
            if self.duration > 0.0 {
                Ok(self.duration)
            } else {
                Err(JobError::invalid("could not read video duration"))
            }
        }

        fn encode(
            &self,
            request: &EncodeRequest,
            cancel: &CancelToken,
            on_progress: &mut dyn FnMut(f64),
        ) -> Result<(), JobError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.behaviour {
                Behaviour::Write(bytes) => {
                    on_progress(self.duration / 2.0);
                    on_progress(self.duration);
                    std::fs::write(&request.output, bytes)?;
                    Ok(())
                }
                Behaviour::FailAfterPartial => {
                    std::fs::write(&request.output, b"partial")?;
                    Err(JobError::EncodingFailed {
                        code: Some(1),
                        stderr: "Conversion failed!".to_string(),
                    })
                }
                Behaviour::Vanish => Ok(()),
                Behaviour::Panic => {
                    std::fs::write(&request.output, b"partial")?;
                    panic!("encoder blew up");
                }
                Behaviour::InterruptedExit => {
                    std::fs::write(&request.output, b"partial")?;
                    cancel.cancel();
                    Err(JobError::EncodingFailed {
                        code: Some(255),
                        stderr: "Exiting normally, received signal 2.".to_string(),
                    })
                }
                Behaviour::Block(release) => {
                    std::fs::write(&request.output, b"partial")?;
                    loop {
                        if cancel.is_cancelled() {
                            return Err(JobError::CancelledByUser);
                        }
                        match release.recv_timeout(Duration::from_millis(10)) {
                            Ok(()) => return Ok(()),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => return Ok(()),
                        }
                    }
                }
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"source").unwrap();
        let output = dir.path().join("clip_small.mp4");
        Fixture {
            _dir: dir,
            input,
            output,
        }
    }

    fn request(f: &Fixture, target_bytes: u64) -> JobRequest {
        JobRequest {
            input_path: f.input.clone(),
            output_path: f.output.clone(),
            target: TargetSize::from_bytes(target_bytes),
            audio_bitrate: 128_000,
        }
    }

    /// Drive the controller until the current job is terminal.
    fn finish(controller: &mut JobController) -> (EncodingJob, Vec<JobEvent>) {
        let mut events = Vec::new();
        while controller.is_busy() {
            if let Some(event) = controller.wait_event(Duration::from_millis(100)) {
                events.push(event);
            }
        }
        (controller.current().cloned().unwrap(), events)
    }

    #[test]
    fn test_successful_job() {
        let f = fixture();
        let encoder = MockEncoder::new(120.0, Behaviour::Write(vec![0u8; 1234]));
        let mut controller = JobController::new(encoder.clone());

        let id = controller.submit(request(&f, 8_000_000)).unwrap();
        let (job, events) = finish(&mut controller);

        assert_eq!(job.id, id);
        assert_eq!(job.computed_bitrate, Some(405_333));
        assert_eq!(job.duration_seconds, Some(120.0));
        assert!(matches!(job.status, JobStatus::Completed { output_size: 1234, .. }));
        assert_eq!(events.first(), Some(&JobEvent::Started(id)));
        assert!(events.contains(&JobEvent::Progress(id, 0.5)));
        assert_eq!(events.last(), Some(&JobEvent::Completed(id, 1234)));

        let requests = encoder.requests.lock().unwrap();
        assert_eq!(requests[0].video_bitrate, 405_333);
        assert_eq!(requests[0].audio_bitrate, 128_000);
        assert!(!controller.is_busy());
    }

    #[test]
    fn test_encoder_failure_removes_partial_output() {
        let f = fixture();
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::FailAfterPartial));

        controller.submit(request(&f, 8_000_000)).unwrap();
        let (job, _) = finish(&mut controller);

        assert!(matches!(
            job.status,
            JobStatus::Failed { error: JobError::EncodingFailed { code: Some(1), .. } }
        ));
        assert!(!f.output.exists());
    }

    #[test]
    fn test_missing_output_after_success() {
        let f = fixture();
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::Vanish));

        controller.submit(request(&f, 8_000_000)).unwrap();
        let (job, _) = finish(&mut controller);

        assert_eq!(
            job.status,
            JobStatus::Failed { error: JobError::OutputMissing(f.output.clone()) }
        );
    }

    #[test]
    fn test_unreadable_duration_is_invalid_input() {
        let f = fixture();
        let encoder = MockEncoder::new(0.0, Behaviour::Write(vec![1]));
        let mut controller = JobController::new(encoder.clone());

        controller.submit(request(&f, 8_000_000)).unwrap();
        let (job, _) = finish(&mut controller);

        assert!(matches!(job.status, JobStatus::Failed { error: JobError::InvalidInput(_) }));
        assert!(encoder.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_request_rejected_synchronously() {
        let f = fixture();
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::Vanish));

        let err = controller.submit(request(&f, 0)).unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
        assert!(controller.current().is_none());
    }

    #[test]
    fn test_second_submission_rejected_while_busy() {
        let f = fixture();
        let (release_tx, release_rx) = bounded(1);
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::Block(release_rx)));

        let first = controller.submit(request(&f, 8_000_000)).unwrap();
        assert!(controller.is_busy());

        let err = controller.submit(request(&f, 4_000_000)).unwrap_err();
        assert_eq!(err, JobError::JobInProgress);
        assert_eq!(controller.current().map(|job| job.id), Some(first));

        release_tx.send(()).unwrap();
        let (job, _) = finish(&mut controller);
        assert!(matches!(job.status, JobStatus::Completed { .. }));

        // Idle again: a new job is accepted.
        let second = controller.submit(request(&f, 4_000_000)).unwrap();
        assert_ne!(first, second);
        drop(release_tx);
        let (job, _) = finish(&mut controller);
        assert_eq!(job.id, second);
    }

    #[test]
    fn test_cancel_discards_partial_output() {
        let f = fixture();
        let (_release_tx, release_rx) = bounded::<()>(1);
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::Block(release_rx)));

        let id = controller.submit(request(&f, 8_000_000)).unwrap();
        // Wait until the encoder is running before cancelling.
        loop {
            match controller.wait_event(Duration::from_secs(5)) {
                Some(JobEvent::Probed { .. }) => break,
                Some(_) => {}
                None => panic!("worker never reached the encoder"),
            }
        }
        controller.cancel();
        let (job, events) = finish(&mut controller);

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(events.last(), Some(&JobEvent::Cancelled(id)));
        assert!(!f.output.exists());
    }

    #[test]
    fn test_worker_panic_fails_job() {
        let f = fixture();
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::Panic));

        let id = controller.submit(request(&f, 8_000_000)).unwrap();
        let (job, events) = finish(&mut controller);

        assert!(matches!(job.status, JobStatus::Failed { error: JobError::Io(_) }));
        assert!(matches!(events.last(), Some(JobEvent::Failed(last, _)) if *last == id));
        assert!(!controller.is_busy());
        assert!(!f.output.exists());

        // The controller is usable again.
        controller.submit(request(&f, 8_000_000)).unwrap();
        finish(&mut controller);
    }

    #[test]
    fn test_failed_exit_after_cancel_is_cancelled() {
        let f = fixture();
        let mut controller = JobController::new(MockEncoder::new(60.0, Behaviour::InterruptedExit));

        let id = controller.submit(request(&f, 8_000_000)).unwrap();
        let (job, events) = finish(&mut controller);

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(events.last(), Some(&JobEvent::Cancelled(id)));
        assert!(!f.output.exists());
    }
}
