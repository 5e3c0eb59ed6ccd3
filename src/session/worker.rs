use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::observer::{FrameResult, SessionObserver, SessionOutcome, SessionSummary};
use super::{SessionConfig, Shared};
use crate::detect::{DetectParams, Detector, DetectionBatch};
use crate::frame::RawImage;
use crate::ingest::FrameSource;

pub(super) struct Worker {
    pub(super) source: SourceGuard,
    pub(super) detector: Option<Arc<dyn Detector>>,
    pub(super) config: SessionConfig,
    pub(super) observer: Arc<dyn SessionObserver>,
    pub(super) shared: Arc<Shared>,
}

/// Releases the source on every exit path, unwinding included, and also
/// when a worker is dropped without ever running.
pub(super) struct SourceGuard {
    source: Box<dyn FrameSource>,
}

impl SourceGuard {
    pub(super) fn new(source: Box<dyn FrameSource>) -> Self {
        Self { source }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.source.release();
    }
}

impl Worker {
    /// Thread body. Reports the summary exactly once, after the source has
    /// been released.
    pub(super) fn run(self) -> SessionSummary {
        let Worker {
            source,
            detector,
            config,
            observer,
            shared,
        } = self;

        let summary = catch_unwind(AssertUnwindSafe(|| {
            drive(source, detector, &config, observer.as_ref(), &shared)
        }))
        .unwrap_or_else(|_| {
            log::error!("capture session worker panicked");
            SessionSummary {
                outcome: SessionOutcome::Aborted("session worker panicked".to_string()),
                frames_processed: shared.frames_processed.load(Ordering::SeqCst),
                frames_failed: 0,
            }
        });

        shared.finish(&summary.outcome);
        log::info!(
            "capture session finished: {} ({} processed, {} failed)",
            summary.outcome,
            summary.frames_processed,
            summary.frames_failed
        );
        observer.on_finished(&summary);
        summary
    }
}

fn drive(
    mut guard: SourceGuard,
    detector: Option<Arc<dyn Detector>>,
    config: &SessionConfig,
    observer: &dyn SessionObserver,
    shared: &Shared,
) -> SessionSummary {
    let description = guard.source.describe();

    let Some(detector) = detector else {
        log::warn!("no detection model loaded; not reading {}", description);
        return SessionSummary::empty(SessionOutcome::DetectorUnavailable);
    };

    if let Err(err) = guard.source.open() {
        log::warn!("failed to open {}: {:#}", description, err);
        return SessionSummary::empty(SessionOutcome::FailedToOpen(format!("{:#}", err)));
    }
    log::info!(
        "capture session running on {} with {} detector",
        description,
        detector.name()
    );

    let mut frame_index: u64 = 0;
    let mut frames_processed: u64 = 0;
    let mut frames_failed: u64 = 0;
    let mut consecutive_failures: u32 = 0;

    let outcome = loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            break SessionOutcome::Stopped;
        }

        let started = Instant::now();
        let frame = match guard.source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::debug!("{}: end of stream", description);
                break SessionOutcome::Completed;
            }
            Err(err) => {
                log::info!("{}: read failed, ending session: {:#}", description, err);
                break SessionOutcome::Completed;
            }
        };
        let index = frame_index;
        frame_index += 1;

        match detect_frame(detector.as_ref(), &frame, &config.params) {
            Ok(batch) => {
                consecutive_failures = 0;
                frames_processed += 1;
                shared.frames_processed.fetch_add(1, Ordering::SeqCst);
                observer.on_frame(FrameResult {
                    index,
                    annotated: batch.annotated,
                    detections: batch.detections,
                });
            }
            Err(err) => {
                frames_failed += 1;
                consecutive_failures += 1;
                log::warn!("{}: skipping frame {}: {:#}", description, index, err);
                if consecutive_failures >= config.max_consecutive_failures {
                    break SessionOutcome::Aborted(format!(
                        "{} consecutive detection failures, last: {:#}",
                        consecutive_failures, err
                    ));
                }
            }
        }

        pace(config.frame_interval, started);
    };

    SessionSummary {
        outcome,
        frames_processed,
        frames_failed,
    }
}

/// One detection step. A panicking detector counts as a failed frame.
fn detect_frame(
    detector: &dyn Detector,
    frame: &RawImage,
    params: &DetectParams,
) -> Result<DetectionBatch> {
    catch_unwind(AssertUnwindSafe(|| detector.detect(frame, params)))
        .unwrap_or_else(|_| Err(anyhow!("{} detector panicked", detector.name())))
}

/// Sleep out whatever is left of the frame interval.
fn pace(interval: Duration, started: Instant) {
    let remaining = interval.saturating_sub(started.elapsed());
    if remaining.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(remaining);
    }
}
