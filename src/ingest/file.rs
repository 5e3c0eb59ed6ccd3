//! Local video file source.
//!
//! This module provides `VideoFileSource` for reading frames from local video
//! files. The file source is responsible for:
//! - Rejecting URL schemes (local paths only)
//! - Decoding video frames in-memory, in file order
//! - Reporting end of file as end of stream
//!
//! `stub://` paths produce a finite synthetic video for tests.

use anyhow::{anyhow, Result};
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticFeed;
use super::{FrameSource, SourceStats, DEFAULT_STUB_FRAMES};
use crate::frame::RawImage;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "recordings/seam_07.mp4").
    pub path: String,
    /// Frames produced by a `stub://` path.
    pub frame_limit: u64,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            frame_limit: DEFAULT_STUB_FRAMES,
            width: 640,
            height: 480,
        }
    }
}

/// Local video file source.
pub struct VideoFileSource {
    config: FileConfig,
    backend: Option<FileBackend>,
    frames_read: u64,
}

enum FileBackend {
    Synthetic(SyntheticFeed),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl VideoFileSource {
    pub fn new(config: FileConfig) -> Self {
        Self {
            config,
            backend: None,
            frames_read: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    fn open_backend(&self) -> Result<FileBackend> {
        if !is_local_file_path(&self.config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): '{}'",
                self.config.path
            ));
        }
        if self.config.path.starts_with("stub://") {
            return Ok(FileBackend::Synthetic(SyntheticFeed::new(
                self.config.width,
                self.config.height,
                Some(self.config.frame_limit),
            )));
        }
        if !Path::new(&self.config.path).is_file() {
            return Err(anyhow!("video file not found: {}", self.config.path));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(FileBackend::Ffmpeg(FfmpegFileSource::open(&self.config.path)?))
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "cannot decode {}: video decoding requires the ingest-file-ffmpeg feature",
                self.config.path
            ))
        }
    }
}

impl FrameSource for VideoFileSource {
    fn describe(&self) -> String {
        format!("video file {}", self.config.path)
    }

    fn open(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        let backend = self.open_backend()?;
        match &backend {
            FileBackend::Synthetic(_) => {
                log::info!("VideoFileSource: opened {} (synthetic)", self.config.path)
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(_) => {
                log::info!("VideoFileSource: opened {} (ffmpeg)", self.config.path)
            }
        }
        self.backend = Some(backend);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawImage>> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!("video file {} is not open", self.config.path))?;
        let frame = match backend {
            FileBackend::Synthetic(feed) => feed.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(decoder) => decoder.next_frame()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if self.backend.take().is_some() {
            log::debug!(
                "VideoFileSource: released {} after {} frame(s)",
                self.config.path,
                self.frames_read
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            source: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
