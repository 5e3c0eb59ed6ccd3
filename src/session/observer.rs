use std::sync::mpsc;

use crate::detect::Detection;
use crate::frame::RawImage;

/// One processed frame handed to the observer.
#[derive(Clone, Debug)]
pub struct FrameResult {
    /// Zero-based position of the frame in the source. Frames skipped after
    /// a detector failure leave a gap.
    pub index: u64,
    /// Frame with detections drawn on it.
    pub annotated: RawImage,
    pub detections: Vec<Detection>,
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The source reached end of stream (or a read failed).
    Completed,
    /// `stop()` was honoured.
    Stopped,
    /// The source could not be opened; no frames were delivered.
    FailedToOpen(String),
    /// No detector was loaded; no frames were delivered.
    DetectorUnavailable,
    /// Too many consecutive detector failures, or the worker panicked.
    Aborted(String),
}

impl SessionOutcome {
    /// True for the reported-but-not-fatal error conditions.
    pub fn is_error(&self) -> bool {
        !matches!(self, SessionOutcome::Completed | SessionOutcome::Stopped)
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Stopped => write!(f, "stopped"),
            SessionOutcome::FailedToOpen(reason) => write!(f, "failed to open source: {}", reason),
            SessionOutcome::DetectorUnavailable => write!(f, "no detection model loaded"),
            SessionOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Final report delivered once per session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub frames_processed: u64,
    pub frames_failed: u64,
}

impl SessionSummary {
    pub(crate) fn empty(outcome: SessionOutcome) -> Self {
        Self {
            outcome,
            frames_processed: 0,
            frames_failed: 0,
        }
    }
}

/// Sink for session results.
///
/// Both callbacks run on the session worker thread. Embedders that own a UI
/// thread marshal from here (see `ChannelObserver`). A slow `on_frame`
/// backpressures the capture loop.
pub trait SessionObserver: Send + Sync {
    /// Called once per processed frame, in frame order.
    fn on_frame(&self, frame: FrameResult);

    /// Called exactly once, after the last `on_frame`.
    fn on_finished(&self, summary: &SessionSummary);
}

/// Observer built from two closures.
pub struct FnObserver<F, G> {
    on_frame: F,
    on_finished: G,
}

impl<F, G> FnObserver<F, G>
where
    F: Fn(FrameResult) + Send + Sync,
    G: Fn(&SessionSummary) + Send + Sync,
{
    pub fn new(on_frame: F, on_finished: G) -> Self {
        Self {
            on_frame,
            on_finished,
        }
    }
}

impl<F, G> SessionObserver for FnObserver<F, G>
where
    F: Fn(FrameResult) + Send + Sync,
    G: Fn(&SessionSummary) + Send + Sync,
{
    fn on_frame(&self, frame: FrameResult) {
        (self.on_frame)(frame)
    }

    fn on_finished(&self, summary: &SessionSummary) {
        (self.on_finished)(summary)
    }
}

/// Event forwarded by `ChannelObserver`.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Frame(FrameResult),
    Finished(SessionSummary),
}

/// Observer that posts events to a channel drained by the embedding thread.
pub struct ChannelObserver {
    tx: mpsc::Sender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_frame(&self, frame: FrameResult) {
        // A closed receiver means the embedder has gone away.
        let _ = self.tx.send(SessionEvent::Frame(frame));
    }

    fn on_finished(&self, summary: &SessionSummary) {
        let _ = self.tx.send(SessionEvent::Finished(summary.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frame(index: u64) -> FrameResult {
        FrameResult {
            index,
            annotated: RawImage::filled(2, 2, [0, 0, 0]).expect("image"),
            detections: vec![],
        }
    }

    #[test]
    fn fn_observer_forwards_calls() {
        let frames = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (f, d) = (frames.clone(), finished.clone());
        let observer = FnObserver::new(
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            },
        );

        observer.on_frame(frame(0));
        observer.on_frame(frame(1));
        observer.on_finished(&SessionSummary::empty(SessionOutcome::Completed));

        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_observer_preserves_order() {
        let (observer, rx) = ChannelObserver::new();
        observer.on_frame(frame(0));
        observer.on_frame(frame(1));
        observer.on_finished(&SessionSummary::empty(SessionOutcome::Stopped));

        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SessionEvent::Frame(f) if f.index == 0));
        assert!(matches!(&events[1], SessionEvent::Frame(f) if f.index == 1));
        assert!(matches!(
            &events[2],
            SessionEvent::Finished(s) if s.outcome == SessionOutcome::Stopped
        ));
    }

    #[test]
    fn channel_observer_tolerates_dropped_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_frame(frame(0));
        observer.on_finished(&SessionSummary::empty(SessionOutcome::Completed));
    }

    #[test]
    fn outcome_error_classification() {
        assert!(!SessionOutcome::Completed.is_error());
        assert!(!SessionOutcome::Stopped.is_error());
        assert!(SessionOutcome::DetectorUnavailable.is_error());
        assert!(SessionOutcome::FailedToOpen("x".into()).is_error());
    }
}
