//! Weld Inspect
//!
//! Weld seam defect detection over still images, video files and live
//! cameras.
//!
//! # Architecture
//!
//! A `CaptureDetectionSession` pairs one frame source with a shared
//! detector and runs the capture loop on a background worker:
//!
//! 1. **Read**: the source yields RGB24 frames until end of stream.
//! 2. **Detect**: the detector filters by confidence and caps the result count.
//! 3. **Deliver**: the annotated frame and its detections go to the observer.
//! 4. **Finish**: the source is released and the observer is told once.
//!
//! # Module Structure
//!
//! - `frame`: `RawImage`, the packed RGB24 frame type
//! - `detect`: detector capability, backends, YOLO decoding, annotation
//! - `ingest`: frame sources (video files, cameras, RTSP, synthetic)
//! - `session`: the cancellable capture-and-detect loop
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod session;

pub use config::InspectConfig;
pub use detect::{
    detect_single, BoundingBox, DetectParams, Detection, DetectionBatch, Detector,
    DetectorRegistry, StubDetector,
};
pub use frame::RawImage;
pub use ingest::{FrameSource, SourceDescriptor, SourceSettings};
pub use session::{
    CaptureDetectionSession, ChannelObserver, FnObserver, FrameResult, SessionConfig,
    SessionEvent, SessionObserver, SessionOutcome, SessionState, SessionSummary, StopHandle,
};
