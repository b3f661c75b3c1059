//! Error taxonomy for the tracking core.
//!
//! Adapters (decoders, detector backends, config loading) report `anyhow`
//! errors; they are folded into `TrackerError` at the core boundary so callers
//! can tell recoverable faults from fatal ones.

use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Camera, stream, or file could not be opened. Fatal to session start.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Reading a frame failed. Recoverable for file sources (rewind), fatal for live ones.
    #[error("frame read failed: {0}")]
    FrameReadFailure(String),

    /// Detector failure. Degrades the frame to zero detections.
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tracking is already running")]
    AlreadyRunning,

    #[error("tracking is not running")]
    NotRunning,

    #[error("no uploaded video available")]
    NoUploadedVideo,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn frame_read(msg: impl Into<String>) -> Self {
        Self::FrameReadFailure(msg.into())
    }
}
