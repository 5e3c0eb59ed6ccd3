//! Live camera source.
//!
//! This module provides `CameraSource` for reading frames from local capture
//! devices. A camera index `N` maps to `/dev/videoN`; real devices are read
//! through V4L2 (feature: ingest-v4l2). A `stub://` device is an endless
//! synthetic feed.
//!
//! Camera feeds never end on their own; a session over a camera runs until
//! it is stopped or a read fails.

use anyhow::{anyhow, Result};

use super::synthetic::SyntheticFeed;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Capture;
use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::RawImage;

/// Configuration for a camera source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://name`.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested capture rate; 0 keeps the device default.
    pub target_fps: u32,
}

impl CameraConfig {
    pub fn from_index(index: u32, settings: &SourceSettings) -> Self {
        Self {
            device: format!("/dev/video{}", index),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self::from_index(0, &SourceSettings::default())
    }
}

/// Camera frame source.
pub struct CameraSource {
    config: CameraConfig,
    backend: Option<CameraBackend>,
    frames_read: u64,
}

enum CameraBackend {
    Synthetic(SyntheticFeed),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Capture),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            backend: None,
            frames_read: 0,
        }
    }

    fn open_backend(&self) -> Result<CameraBackend> {
        if self.config.device.starts_with("stub://") {
            return Ok(CameraBackend::Synthetic(SyntheticFeed::new(
                self.config.width,
                self.config.height,
                None,
            )));
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(CameraBackend::Device(V4l2Capture::open(&self.config)?))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "cannot open {}: camera capture requires the ingest-v4l2 feature",
                self.config.device
            ))
        }
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        format!("camera {}", self.config.device)
    }

    fn open(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        let backend = self.open_backend()?;
        log::info!("CameraSource: opened {}", self.config.device);
        self.backend = Some(backend);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawImage>> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} is not open", self.config.device))?;
        let frame = match backend {
            CameraBackend::Synthetic(feed) => feed.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(capture) => Some(capture.next_frame()?),
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if self.backend.take().is_some() {
            log::debug!(
                "CameraSource: released {} after {} frame(s)",
                self.config.device,
                self.frames_read
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            source: self.config.device.clone(),
        }
    }
}

/// List usable camera indices.
///
/// Tries indices from 0 upward and stops at the first camera that cannot be
/// opened or cannot deliver a frame.
pub fn probe_cameras(max_index: u32, settings: &SourceSettings) -> Vec<u32> {
    probe_sources(max_index, |index| {
        Box::new(CameraSource::new(CameraConfig::from_index(index, settings)))
    })
}

/// Probe sources produced by `factory` for indices `0..max_index`.
pub fn probe_sources<F>(max_index: u32, mut factory: F) -> Vec<u32>
where
    F: FnMut(u32) -> Box<dyn FrameSource>,
{
    let mut usable = Vec::new();
    for index in 0..max_index {
        let mut source = factory(index);
        let delivered = source.open().is_ok() && matches!(source.read_frame(), Ok(Some(_)));
        source.release();
        if !delivered {
            log::debug!("camera probe stopped at {}", source.describe());
            break;
        }
        usable.push(index);
    }
    usable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
            target_fps: 10,
        }
    }

    #[test]
    fn camera_source_produces_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config());
        source.open()?;

        for _ in 0..5 {
            let frame = source.read_frame()?.expect("camera feeds do not end");
            assert_eq!(frame.width(), 64);
            assert_eq!(frame.height(), 48);
        }
        assert_eq!(source.stats().frames_read, 5);
        Ok(())
    }

    #[test]
    fn index_maps_to_device_node() {
        let config = CameraConfig::from_index(3, &SourceSettings::default());
        assert_eq!(config.device, "/dev/video3");
    }

    #[test]
    fn probe_stops_at_first_unusable_index() {
        let usable = probe_sources(5, |index| {
            let device = if index < 2 {
                format!("stub://cam{}", index)
            } else {
                "/nonexistent/video".to_string()
            };
            Box::new(CameraSource::new(CameraConfig {
                device,
                ..stub_config()
            }))
        });
        assert_eq!(usable, vec![0, 1]);
    }
}
