//! Snapshot shared between the tracking worker and readers.
//!
//! One writer (the worker) swaps in a new snapshot per frame; readers copy
//! what they need under a short read lock. Frames are reference counted so
//! JPEG encoding happens after the lock is released.

use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use image::RgbImage;

use crate::annotate::{encode_jpeg, Annotator};
use crate::geometry::MonitorArea;
use crate::ingest::SourceKind;
use crate::presence::PresencePhase;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Inactive,
}

/// Status as reported to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: SessionStatus,
    pub employee_present: bool,
    pub frames_processed: u64,
    /// Seconds since the current absence began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absence_duration: Option<f64>,
}

/// One frame's worth of worker output.
#[derive(Clone, Debug)]
pub struct Publication {
    pub image: RgbImage,
    pub phase: PresencePhase,
    pub absence_started: Option<Instant>,
}

#[derive(Debug)]
struct Snapshot {
    generation: u64,
    running: bool,
    frame: Option<Arc<RgbImage>>,
    frames_processed: u64,
    phase: PresencePhase,
    absence_started: Option<Instant>,
    area: Option<MonitorArea>,
    source: Option<SourceKind>,
}

impl Snapshot {
    fn new() -> Self {
        Self {
            generation: 0,
            running: false,
            frame: None,
            frames_processed: 0,
            phase: PresencePhase::Unobserved,
            absence_started: None,
            area: None,
            source: None,
        }
    }
}

pub struct SharedState {
    inner: RwLock<Snapshot>,
    annotator: Annotator,
}

impl SharedState {
    pub fn new(annotator: Annotator) -> Self {
        Self {
            inner: RwLock::new(Snapshot::new()),
            annotator,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset for a new session and return its generation.
    ///
    /// Publications tagged with an older generation are ignored, so a worker
    /// that outlived its stop timeout cannot touch the next session.
    pub fn begin_session(&self, area: MonitorArea, source: SourceKind) -> u64 {
        let mut snapshot = self.write();
        let generation = snapshot.generation + 1;
        *snapshot = Snapshot {
            generation,
            running: true,
            area: Some(area),
            source: Some(source),
            ..Snapshot::new()
        };
        generation
    }

    /// Swap in the latest frame; returns the new frame count.
    pub fn publish(&self, generation: u64, publication: Publication) -> Option<u64> {
        let frame = Arc::new(publication.image);
        let mut snapshot = self.write();
        if snapshot.generation != generation {
            return None;
        }
        snapshot.frame = Some(frame);
        snapshot.frames_processed += 1;
        snapshot.phase = publication.phase;
        snapshot.absence_started = publication.absence_started;
        Some(snapshot.frames_processed)
    }

    /// Mark the session stopped. Returns false if it was already stopped.
    pub fn mark_stopped(&self, generation: u64) -> bool {
        let mut snapshot = self.write();
        if snapshot.generation != generation || !snapshot.running {
            return false;
        }
        snapshot.running = false;
        true
    }

    /// Generation of the most recent session.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn is_running(&self) -> bool {
        self.read().running
    }

    pub fn frames_processed(&self) -> u64 {
        self.read().frames_processed
    }

    pub fn monitor_area(&self) -> Option<MonitorArea> {
        self.read().area
    }

    pub fn phase(&self) -> PresencePhase {
        self.read().phase
    }

    pub fn status(&self) -> StatusReport {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> StatusReport {
        let snapshot = self.read();
        let employee_present = snapshot.phase == PresencePhase::Present;
        let absence_duration = snapshot
            .absence_started
            .filter(|_| !employee_present)
            .map(|started| now.saturating_duration_since(started).as_secs_f64());
        StatusReport {
            status: if snapshot.running {
                SessionStatus::Active
            } else {
                SessionStatus::Inactive
            },
            employee_present,
            frames_processed: snapshot.frames_processed,
            absence_duration,
        }
    }

    pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.read().frame.clone()
    }

    /// JPEG of the latest frame, or the placeholder before the first publication.
    pub fn current_frame_jpeg(&self) -> Result<Vec<u8>> {
        match self.latest_frame() {
            Some(frame) => encode_jpeg(&frame),
            None => encode_jpeg(&self.annotator.placeholder()),
        }
    }
}
