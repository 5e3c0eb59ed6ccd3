//! RTSP frame source.
//!
//! This module provides `StreamSource` for reading frames from network
//! cameras over RTSP, decoded with GStreamer (feature: rtsp-gstreamer).
//! A `stub://` URL is an endless synthetic feed.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use std::time::Duration;

use super::synthetic::SyntheticFeed;
use super::{FrameSource, SourceStats};
use crate::frame::RawImage;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Expected frame rate; used to size the pull timeout.
    pub target_fps: u32,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// RTSP frame source.
pub struct StreamSource {
    config: StreamConfig,
    backend: Option<StreamBackend>,
    frames_read: u64,
}

enum StreamBackend {
    Synthetic(SyntheticFeed),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerStream),
}

impl StreamSource {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            backend: None,
            frames_read: 0,
        }
    }

    fn open_backend(&self) -> Result<StreamBackend> {
        if self.config.url.starts_with("stub://") {
            return Ok(StreamBackend::Synthetic(SyntheticFeed::new(
                self.config.width,
                self.config.height,
                None,
            )));
        }
        if !self.config.url.starts_with("rtsp://") && !self.config.url.starts_with("rtsps://") {
            return Err(anyhow!("unsupported stream URL '{}'", self.config.url));
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(StreamBackend::Gstreamer(GstreamerStream::open(&self.config)?))
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(anyhow!(
                "cannot open {}: RTSP requires the rtsp-gstreamer feature",
                self.config.url
            ))
        }
    }
}

impl FrameSource for StreamSource {
    fn describe(&self) -> String {
        format!("stream {}", self.config.url)
    }

    fn open(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        let backend = self.open_backend()?;
        log::info!("StreamSource: connected to {}", self.config.url);
        self.backend = Some(backend);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawImage>> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!("stream {} is not open", self.config.url))?;
        let frame = match backend {
            StreamBackend::Synthetic(feed) => feed.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            StreamBackend::Gstreamer(stream) => stream.next_frame()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if self.backend.take().is_some() {
            log::debug!(
                "StreamSource: released {} after {} frame(s)",
                self.config.url,
                self.frames_read
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            source: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Sample pulling for live streams
// ----------------------------------------------------------------------------

/// Time allowed for the first sample: RTSP handshake plus decoder preroll.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Empty pulls in a row before a running stream counts as stalled.
const DEFAULT_MAX_EMPTY_PULLS: u32 = 3;

/// Outcome of one timed pull from a live pipeline.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
enum Pull<T> {
    Sample(T),
    Eos,
    Empty,
}

#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PullPolicy {
    connect_timeout: Duration,
    frame_timeout: Duration,
    max_empty_pulls: u32,
}

#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
impl PullPolicy {
    /// Per-frame wait of four frame intervals, never below 500ms.
    fn for_fps(target_fps: u32) -> Self {
        let frame_ms = if target_fps == 0 {
            500
        } else {
            (1000 / target_fps).saturating_mul(4).max(500)
        };
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            frame_timeout: Duration::from_millis(frame_ms as u64),
            max_empty_pulls: DEFAULT_MAX_EMPTY_PULLS,
        }
    }

    /// Pull until a sample or EOS arrives. Until the first sample the
    /// connect timeout applies; empty pulls are retried up to
    /// `max_empty_pulls` times before the stream is reported stalled.
    fn pull<T>(
        &self,
        started: bool,
        mut pull_once: impl FnMut(Duration) -> Pull<T>,
    ) -> Result<Option<T>> {
        let timeout = if started {
            self.frame_timeout
        } else {
            self.connect_timeout
        };
        let attempts = self.max_empty_pulls.max(1);
        for attempt in 1..=attempts {
            match pull_once(timeout) {
                Pull::Sample(sample) => return Ok(Some(sample)),
                Pull::Eos => return Ok(None),
                Pull::Empty => log::debug!(
                    "StreamSource: no sample within {:?} (attempt {}/{})",
                    timeout,
                    attempt,
                    attempts
                ),
            }
        }
        Err(anyhow!(
            "RTSP stream stalled: no sample in {} pull(s) of {:?}",
            attempts,
            timeout
        ))
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    policy: PullPolicy,
    started: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStream {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` and start it.
    fn open(config: &StreamConfig) -> Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        Ok(Self {
            pipeline,
            appsink,
            policy: PullPolicy::for_fps(config.target_fps),
            started: false,
        })
    }

    /// Next frame, `None` once the stream has reached EOS.
    fn next_frame(&mut self) -> Result<Option<RawImage>> {
        if self.appsink.is_eos() {
            return Ok(None);
        }
        let appsink = &self.appsink;
        let sample = self.policy.pull(self.started, |timeout| {
            let timeout = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);
            match appsink.try_pull_sample(timeout) {
                Some(sample) => Pull::Sample(sample),
                None if appsink.is_eos() => Pull::Eos,
                None => Pull::Empty,
            }
        })?;
        match sample {
            Some(sample) => {
                self.started = true;
                sample_to_image(&sample).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerStream {
    fn drop(&mut self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop RTSP pipeline: {}", err);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_image(sample: &gstreamer::Sample) -> Result<RawImage> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    RawImage::new(pixels, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> StreamConfig {
        StreamConfig {
            url: "stub://test".to_string(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stream_source_produces_frames() -> Result<()> {
        let mut source = StreamSource::new(stub_config());
        source.open()?;

        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        Ok(())
    }

    #[test]
    fn first_pull_waits_for_connect_timeout() -> Result<()> {
        let policy = PullPolicy::for_fps(30);
        let mut waits = Vec::new();
        let sample = policy.pull(false, |timeout| {
            waits.push(timeout);
            Pull::Sample(7u32)
        })?;
        assert_eq!(sample, Some(7));
        assert_eq!(waits, vec![DEFAULT_CONNECT_TIMEOUT]);

        waits.clear();
        policy.pull(true, |timeout| {
            waits.push(timeout);
            Pull::Sample(8u32)
        })?;
        assert_eq!(waits, vec![Duration::from_millis(500)]);
        Ok(())
    }

    #[test]
    fn empty_pulls_are_retried_before_stall() -> Result<()> {
        let policy = PullPolicy::for_fps(10);
        let mut calls = 0;
        let sample = policy.pull(true, |_| {
            calls += 1;
            if calls < 3 {
                Pull::Empty
            } else {
                Pull::Sample("frame")
            }
        })?;
        assert_eq!(sample, Some("frame"));
        assert_eq!(calls, 3);

        let mut calls = 0;
        let err = policy
            .pull::<()>(true, |_| {
                calls += 1;
                Pull::Empty
            })
            .unwrap_err();
        assert_eq!(calls, DEFAULT_MAX_EMPTY_PULLS);
        assert!(err.to_string().contains("stalled"));
        Ok(())
    }

    #[test]
    fn eos_ends_stream_without_error() -> Result<()> {
        let policy = PullPolicy::for_fps(30);
        assert_eq!(policy.pull::<u8>(false, |_| Pull::Eos)?, None);
        Ok(())
    }

    #[test]
    fn stream_source_rejects_non_rtsp_urls() {
        let mut source = StreamSource::new(StreamConfig {
            url: "http://camera/stream".to_string(),
            ..stub_config()
        });
        assert!(source.open().is_err());
    }
}
