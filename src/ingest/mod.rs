//! Frame sources.
//!
//! This module provides the sources a capture session can read from:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Cameras by index or device path (feature: ingest-v4l2)
//! - RTSP streams from network cameras (feature: rtsp-gstreamer)
//! - Synthetic `stub://` feeds for every kind (testing, demos)
//!
//! Construction never touches the file system or devices. All validation and
//! device access happens in `FrameSource::open`, so a session can report an
//! unopenable source through its normal finish path instead of failing early.
//!
//! All sources produce packed RGB24 `RawImage` frames.

use anyhow::Result;
use std::fmt;

use crate::frame::RawImage;

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
pub mod stream;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

pub use camera::{probe_cameras, probe_sources, CameraConfig, CameraSource};
pub use file::{FileConfig, VideoFileSource};
pub use stream::{StreamConfig, StreamSource};

/// Default number of frames a `stub://` video file yields.
pub const DEFAULT_STUB_FRAMES: u64 = 100;

/// An openable, sequentially readable, releasable provider of frames.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Open the underlying file or device. Opening an open source is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame.
    ///
    /// `Ok(None)` signals end of stream. `Err` is a read failure; callers
    /// driving a capture loop treat both as the natural end of the source.
    fn read_frame(&mut self) -> Result<Option<RawImage>>;

    /// Release the file or device. Idempotent.
    fn release(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_read: u64,
    pub source: String,
}

/// Shared capture settings applied when a descriptor is turned into a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// Frames yielded by a `stub://` video file.
    pub frame_limit: u64,
    /// Preferred frame width (cameras, synthetic feeds).
    pub width: u32,
    /// Preferred frame height (cameras, synthetic feeds).
    pub height: u32,
    /// Requested capture rate for devices that support it.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            frame_limit: DEFAULT_STUB_FRAMES,
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// What a session should read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Local video file path, or `stub://name` for a finite synthetic video.
    VideoFile(String),
    /// Camera by index (`/dev/videoN`).
    Camera(u32),
    /// Camera by explicit device path, or `stub://name` for a synthetic feed.
    CameraDevice(String),
    /// RTSP URL, or `stub://name`.
    Stream(String),
}

impl SourceDescriptor {
    /// Build an unopened source. Never fails; problems surface at `open`.
    pub fn build(&self, settings: &SourceSettings) -> Box<dyn FrameSource> {
        match self {
            SourceDescriptor::VideoFile(path) => Box::new(VideoFileSource::new(FileConfig {
                path: path.clone(),
                frame_limit: settings.frame_limit,
                width: settings.width,
                height: settings.height,
            })),
            SourceDescriptor::Camera(index) => Box::new(CameraSource::new(
                CameraConfig::from_index(*index, settings),
            )),
            SourceDescriptor::CameraDevice(device) => Box::new(CameraSource::new(CameraConfig {
                device: device.clone(),
                width: settings.width,
                height: settings.height,
                target_fps: settings.target_fps,
            })),
            SourceDescriptor::Stream(url) => Box::new(StreamSource::new(StreamConfig {
                url: url.clone(),
                target_fps: settings.target_fps,
                width: settings.width,
                height: settings.height,
            })),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::VideoFile(path) => write!(f, "video file {}", path),
            SourceDescriptor::Camera(index) => write!(f, "camera #{}", index),
            SourceDescriptor::CameraDevice(device) => write!(f, "camera {}", device),
            SourceDescriptor::Stream(url) => write!(f, "stream {}", url),
        }
    }
}
