//! Periodic snapshots of the annotated frame.

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Writes `frame_<n:06>.jpg` into the output directory at most once per interval.
#[derive(Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    interval: Duration,
    last_saved: Instant,
}

impl SnapshotWriter {
    /// The first snapshot is due one interval after `started`.
    pub fn new(dir: impl Into<PathBuf>, interval: Duration, started: Instant) -> Self {
        Self {
            dir: dir.into(),
            interval,
            last_saved: started,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_saved) > self.interval
    }

    /// Save `image` when due. Failures are logged; tracking continues.
    pub fn maybe_save(&mut self, image: &RgbImage, frame_number: u64, now: Instant) -> Option<PathBuf> {
        if !self.is_due(now) {
            return None;
        }
        self.last_saved = now;
        match self.save(image, frame_number) {
            Ok(path) => {
                log::debug!("saved snapshot {}", path.display());
                Some(path)
            }
            Err(err) => {
                log::warn!("snapshot not saved: {:#}", err);
                None
            }
        }
    }

    fn save(&self, image: &RgbImage, frame_number: u64) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot directory {}", self.dir.display()))?;
        let path = self.dir.join(snapshot_file_name(frame_number));
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

pub fn snapshot_file_name(frame_number: u64) -> String {
    format!("frame_{:06}.jpg", frame_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saves_only_after_interval() -> Result<()> {
        let dir = tempdir()?;
        let start = Instant::now();
        let mut writer = SnapshotWriter::new(dir.path().join("out"), Duration::from_secs(10), start);
        let image = RgbImage::new(60, 45);

        assert!(writer.maybe_save(&image, 1, start + Duration::from_secs(10)).is_none());
        let saved = writer.maybe_save(&image, 42, start + Duration::from_secs(11));
        assert_eq!(saved, Some(dir.path().join("out/frame_000042.jpg")));
        assert!(dir.path().join("out/frame_000042.jpg").is_file());

        // Interval restarts from the last save.
        assert!(writer.maybe_save(&image, 43, start + Duration::from_secs(15)).is_none());
        Ok(())
    }

    #[test]
    fn unwritable_directory_is_not_fatal() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x")?;
        let start = Instant::now();
        let mut writer = SnapshotWriter::new(blocker.join("out"), Duration::from_secs(1), start);
        assert!(writer
            .maybe_save(&RgbImage::new(4, 4), 1, start + Duration::from_secs(2))
            .is_none());
        Ok(())
    }
}
