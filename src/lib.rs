//! Desk presence tracker.
//!
//! Watches a video source, finds people with an object detector, and decides
//! whether the person assigned to a desk is present. Absences longer than a
//! threshold are confirmed and journaled; returns are journaled with the
//! absence duration.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (webcam, stream URL, uploaded file, synthetic)
//! - `detect`: Detector backends and post-processing
//! - `area`: Monitor area selection (manual coordinates or desk furniture)
//! - `classifier`: Per-frame "employee at desk" decision
//! - `presence`: Absence/return state machine
//! - `session`: Tracker lifecycle and the background worker
//! - `shared`: Latest frame and status shared with readers
//! - `api`: Local HTTP surface (status, logs, MJPEG feed, uploads)

pub mod annotate;
pub mod api;
pub mod area;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod journal;
pub mod presence;
pub mod session;
pub mod shared;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use area::{AreaEstimate, AreaMethod};
pub use classifier::{classify, Classification, PersonVerdict};
pub use config::{DeskwatchConfig, SessionRequest};
pub use error::{TrackerError, TrackerResult};
pub use frame::Frame;
pub use geometry::{MonitorArea, PixelBox};
pub use journal::EventJournal;
pub use presence::{PresenceEvent, PresencePhase, PresenceStateMachine};
pub use session::{SessionConfig, Tracker, TrackerSettings};
pub use shared::{SessionStatus, StatusReport};
