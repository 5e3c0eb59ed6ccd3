//! Capture-detection sessions.
//!
//! A `CaptureDetectionSession` owns one frame source and drives it on a
//! background worker thread: read a frame, run the detector, hand the
//! annotated result to the observer, pace, repeat. The session ends when the
//! source is exhausted, a read fails, `stop()` is requested, or the detector
//! keeps failing. Whatever the reason, the source is released and
//! `SessionObserver::on_finished` fires exactly once.
//!
//! Lifecycle:
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --> Finished
//!                    |                              ^
//!                    +--- end of stream / abort ----+
//!                    +--- open failure ---> FailedToOpen
//! ```

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::{self, DetectParams, Detector, DetectionBatch};
use crate::frame::RawImage;
use crate::ingest::{FrameSource, SourceDescriptor, SourceSettings};

mod observer;
mod worker;

pub use observer::{
    ChannelObserver, FnObserver, FrameResult, SessionEvent, SessionObserver, SessionOutcome,
    SessionSummary,
};

use worker::{SourceGuard, Worker};

/// Default pause target between frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(30);
/// Consecutive detector failures tolerated before a session aborts.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Finished,
    FailedToOpen,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::FailedToOpen)
    }
}

/// Per-session tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub params: DetectParams,
    /// Target time from one frame read to the next. Zero only yields.
    pub frame_interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            params: DetectParams::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be at least 1"));
        }
        Ok(())
    }
}

/// State shared between the session handle and its worker.
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    stop_requested: AtomicBool,
    frames_processed: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            stop_requested: AtomicBool::new(false),
            frames_processed: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // The state is a plain enum; a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        *self.lock_state()
    }

    fn request_stop(&self) -> bool {
        let mut state = self.lock_state();
        if *state != SessionState::Running {
            return false;
        }
        *state = SessionState::Stopping;
        self.stop_requested.store(true, Ordering::SeqCst);
        true
    }

    fn finish(&self, outcome: &SessionOutcome) {
        let mut state = self.lock_state();
        *state = match outcome {
            SessionOutcome::FailedToOpen(_) => SessionState::FailedToOpen,
            _ => SessionState::Finished,
        };
    }
}

/// Cloneable handle that can stop a session from another thread, such as a
/// Ctrl-C handler.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.shared.request_stop() {
            log::info!("capture session stop requested");
        }
    }
}

/// A cancellable background capture-and-detect loop over one source.
pub struct CaptureDetectionSession {
    source: Option<Box<dyn FrameSource>>,
    description: String,
    detector: Option<Arc<dyn Detector>>,
    config: SessionConfig,
    observer: Arc<dyn SessionObserver>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<SessionSummary>>,
}

impl CaptureDetectionSession {
    /// Create an idle session. The source is not opened until `start`.
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Option<Arc<dyn Detector>>,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let description = source.describe();
        Self {
            source: Some(source),
            description,
            detector,
            config,
            observer,
            shared: Arc::new(Shared::new()),
            worker: None,
        }
    }

    pub fn from_descriptor(
        descriptor: &SourceDescriptor,
        settings: &SourceSettings,
        detector: Option<Arc<dyn Detector>>,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self::new(descriptor.build(settings), detector, config, observer)
    }

    /// Launch the worker and return immediately.
    ///
    /// Errors only on misuse: a session starts at most once, and its config
    /// must be valid. A missing detector or unopenable source is reported
    /// through `on_finished` instead. If the worker thread cannot be spawned
    /// this errors and `on_finished` also fires, on the calling thread.
    pub fn start(&mut self) -> Result<()> {
        self.config
            .validate()
            .context("invalid session configuration")?;

        {
            let mut state = self.shared.lock_state();
            if *state != SessionState::Idle {
                return Err(anyhow!(
                    "session on {} already started (state {:?})",
                    self.description,
                    *state
                ));
            }
            *state = SessionState::Running;
        }

        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("session on {} has no source", self.description))?;
        let worker = Worker {
            source: SourceGuard::new(source),
            detector: self.detector.clone(),
            config: self.config.clone(),
            observer: self.observer.clone(),
            shared: self.shared.clone(),
        };

        self.launch(worker, |worker| {
            std::thread::Builder::new()
                .name("capture-session".to_string())
                .spawn(move || worker.run())
        })
    }

    /// Hand the worker to `spawn`. If no thread could be started the worker
    /// is dropped, which releases the source, and the observer still gets
    /// its single `on_finished`.
    fn launch<S>(&mut self, worker: Worker, spawn: S) -> Result<()>
    where
        S: FnOnce(Worker) -> std::io::Result<JoinHandle<SessionSummary>>,
    {
        match spawn(worker) {
            Ok(handle) => {
                log::debug!("capture session started on {}", self.description);
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                let summary = SessionSummary::empty(SessionOutcome::Aborted(format!(
                    "failed to spawn worker: {}",
                    err
                )));
                log::error!("capture session on {}: {}", self.description, summary.outcome);
                self.shared.finish(&summary.outcome);
                self.observer.on_finished(&summary);
                Err(anyhow::Error::new(err).context("spawn capture session worker"))
            }
        }
    }

    /// Request cooperative cancellation. Returns immediately; the worker
    /// finishes its current frame first. No-op unless the session is running.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// True from a successful `start` until the worker has finished,
    /// including while a stop is pending.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Running | SessionState::Stopping
        )
    }

    /// Frames delivered to the observer so far.
    pub fn frames_processed(&self) -> u64 {
        self.shared.frames_processed.load(Ordering::SeqCst)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Block until the worker has finished and return its summary.
    pub fn wait(&mut self) -> Result<SessionSummary> {
        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("session on {} has no running worker", self.description))?;
        handle
            .join()
            .map_err(|_| anyhow!("capture session worker thread panicked"))
    }

    /// Single-shot detection with this session's detector and parameters.
    pub fn detect_single(&self, image: &RawImage) -> Result<DetectionBatch> {
        detect::detect_single(self.detector.as_deref(), image, &self.config.params)
    }
}

impl Drop for CaptureDetectionSession {
    fn drop(&mut self) {
        if self.worker.take().is_some() && self.shared.request_stop() {
            log::debug!(
                "capture session on {} dropped while running; worker detached",
                self.description
            );
        }
    }
}
