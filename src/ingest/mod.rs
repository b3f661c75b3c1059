//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Uploaded video files (feature: ingest-ffmpeg), rewindable and looped
//! - Custom stream URLs such as RTSP or HTTP (feature: ingest-ffmpeg)
//! - Webcams by device index (feature: ingest-v4l2) or by path/URL (ingest-ffmpeg)
//! - Synthetic `stub://` sources (testing, demos)
//!
//! Sources hand out full-resolution RGB images; `next_frame` normalizes them
//! to the working width immediately after capture.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
#[cfg(any(test, feature = "ingest-v4l2"))]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{TrackerError, TrackerResult};
use crate::frame::Frame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Where frames come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Webcam,
    Upload,
    Custom,
}

impl SourceKind {
    /// File-backed sources loop on end of stream; live sources end the session.
    pub fn is_file_backed(self) -> bool {
        matches!(self, SourceKind::Upload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Webcam => "webcam",
            SourceKind::Upload => "upload",
            SourceKind::Custom => "custom",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated source selection for one tracking session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Device index, stream URL, file path, or `stub://` locator.
    pub locator: String,
}

impl SourceSettings {
    pub fn new(kind: SourceKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub locator: String,
}

/// A sequential frame producer.
pub trait FrameSource {
    /// Read the next full-resolution frame. `Ok(None)` means end of stream.
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Whether `rewind` can restart the stream from its first frame.
    fn is_rewindable(&self) -> bool;

    /// Seek back to position zero.
    fn rewind(&mut self) -> Result<()>;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Open the source described by `settings`.
pub fn open_source(settings: &SourceSettings) -> TrackerResult<Box<dyn FrameSource>> {
    if settings.locator.starts_with(synthetic::STUB_SCHEME) {
        let source = SyntheticSource::open(&settings.locator, settings.kind)
            .map_err(|e| TrackerError::source_unavailable(format!("{:#}", e)))?;
        return Ok(Box::new(source));
    }

    match settings.kind {
        SourceKind::Upload => {
            if !Path::new(&settings.locator).is_file() {
                return Err(TrackerError::source_unavailable(format!(
                    "could not open uploaded video {}",
                    settings.locator
                )));
            }
            open_decoded(settings, true)
        }
        SourceKind::Webcam => match settings.locator.trim().parse::<u32>() {
            Ok(index) => open_camera_index(index),
            Err(_) => open_decoded(settings, false),
        },
        SourceKind::Custom => {
            url::Url::parse(&settings.locator).map_err(|e| {
                TrackerError::source_unavailable(format!(
                    "invalid stream URL '{}': {}",
                    settings.locator, e
                ))
            })?;
            open_decoded(settings, false)
        }
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_decoded(settings: &SourceSettings, rewindable: bool) -> TrackerResult<Box<dyn FrameSource>> {
    let source = ffmpeg::FfmpegSource::open(&settings.locator, rewindable).map_err(|e| {
        TrackerError::source_unavailable(format!(
            "could not open video source {}: {:#}",
            settings.locator, e
        ))
    })?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_decoded(settings: &SourceSettings, _rewindable: bool) -> TrackerResult<Box<dyn FrameSource>> {
    Err(TrackerError::source_unavailable(format!(
        "decoding {} requires the ingest-ffmpeg feature",
        settings.locator
    )))
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera_index(index: u32) -> TrackerResult<Box<dyn FrameSource>> {
    let config = v4l2::V4l2Config {
        device: format!("/dev/video{}", index),
        ..v4l2::V4l2Config::default()
    };
    let mut source = V4l2Source::new(config)
        .map_err(|e| TrackerError::source_unavailable(format!("{:#}", e)))?;
    source
        .connect()
        .map_err(|e| TrackerError::source_unavailable(format!("{:#}", e)))?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera_index(index: u32) -> TrackerResult<Box<dyn FrameSource>> {
    Err(TrackerError::source_unavailable(format!(
        "camera index {} requires the ingest-v4l2 feature",
        index
    )))
}

/// Capture and normalize the next frame. `Ok(None)` means end of stream.
pub fn next_frame(source: &mut dyn FrameSource) -> TrackerResult<Option<Frame>> {
    match source.read() {
        Ok(Some(image)) => Ok(Some(Frame::capture(image))),
        Ok(None) => Ok(None),
        Err(e) => Err(TrackerError::frame_read(format!("{:#}", e))),
    }
}
