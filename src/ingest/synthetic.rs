//! Synthetic frame source (`stub://`).
//!
//! Produces generated RGB frames so the whole pipeline runs without a camera.
//! The locator's query string shapes the stream:
//!
//! - `width`, `height`: capture size (default 640x480)
//! - `frames`: stream length; end of stream after this many frames (default unbounded)
//!
//! The host `offline` simulates a device that cannot be opened.
//! Synthetic uploads are rewindable; webcam and custom streams are not.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use url::Url;

use super::{FrameSource, SourceKind, SourceStats};

pub const STUB_SCHEME: &str = "stub://";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const MAX_DIMENSION: u32 = 4096;

/// Configuration parsed from a `stub://` locator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub locator: String,
    pub width: u32,
    pub height: u32,
    pub frames: Option<u64>,
}

impl SyntheticConfig {
    pub fn parse(locator: &str) -> Result<Self> {
        let url = Url::parse(locator).with_context(|| format!("parse stub locator '{}'", locator))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("'{}' is not a stub:// locator", locator));
        }
        if url.host_str() == Some("offline") {
            return Err(anyhow!("synthetic device {} is offline", locator));
        }

        let mut config = Self {
            locator: locator.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: None,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => config.width = parse_dimension(&key, &value)?,
                "height" => config.height = parse_dimension(&key, &value)?,
                "frames" => {
                    config.frames = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("stub frames must be an integer, got '{}'", value))?,
                    )
                }
                other => log::debug!("SyntheticSource: ignoring unknown parameter {}", other),
            }
        }
        Ok(config)
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<u32> {
    let parsed: u32 = value
        .parse()
        .map_err(|_| anyhow!("stub {} must be an integer, got '{}'", key, value))?;
    if parsed == 0 || parsed > MAX_DIMENSION {
        return Err(anyhow!("stub {} must be in 1..={}", key, MAX_DIMENSION));
    }
    Ok(parsed)
}

/// Generated frame source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    rewindable: bool,
    position: u64,
    frames_captured: u64,
}

impl SyntheticSource {
    pub fn open(locator: &str, kind: SourceKind) -> Result<Self> {
        let config = SyntheticConfig::parse(locator)?;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            config.locator,
            config.width,
            config.height
        );
        Ok(Self {
            config,
            rewindable: kind.is_file_backed(),
            position: 0,
            frames_captured: 0,
        })
    }

    /// Index of the next frame to be produced.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Gray background with a slowly sweeping bright column.
    fn render(&self) -> RgbImage {
        let width = self.config.width;
        let column = (self.position * 7 % width as u64) as u32;
        let shade = (self.position % 64) as u8;
        RgbImage::from_fn(width, self.config.height, |x, _y| {
            if x.abs_diff(column) < 4 {
                Rgb([230, 230, 230])
            } else {
                Rgb([60 + shade, 60 + shade, 60 + shade])
            }
        })
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.config.frames.is_some_and(|limit| self.position >= limit) {
            return Ok(None);
        }
        let image = self.render();
        self.position += 1;
        self.frames_captured += 1;
        Ok(Some(image))
    }

    fn is_rewindable(&self) -> bool {
        self.rewindable
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.rewindable {
            return Err(anyhow!("{} is a live source", self.config.locator));
        }
        self.position = 0;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            locator: self.config.locator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() -> Result<()> {
        let config = SyntheticConfig::parse("stub://desk?width=1280&height=720&frames=30")?;
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.frames, Some(30));

        let defaults = SyntheticConfig::parse("stub://desk")?;
        assert_eq!((defaults.width, defaults.height), (640, 480));
        assert_eq!(defaults.frames, None);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::parse("stub://desk?width=0").is_err());
        assert!(SyntheticConfig::parse("stub://desk?frames=many").is_err());
        assert!(SyntheticConfig::parse("stub://offline").is_err());
        assert!(SyntheticConfig::parse("rtsp://desk").is_err());
    }

    #[test]
    fn finite_upload_ends_and_rewinds() -> Result<()> {
        let mut source = SyntheticSource::open("stub://clip?frames=2", SourceKind::Upload)?;
        assert!(source.read()?.is_some());
        assert!(source.read()?.is_some());
        assert!(source.read()?.is_none());

        source.rewind()?;
        assert_eq!(source.position(), 0);
        assert!(source.read()?.is_some());
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[test]
    fn live_source_cannot_rewind() -> Result<()> {
        let mut source = SyntheticSource::open("stub://cam?frames=1", SourceKind::Webcam)?;
        assert!(source.read()?.is_some());
        assert!(source.read()?.is_none());
        assert!(source.rewind().is_err());
        Ok(())
    }
}
