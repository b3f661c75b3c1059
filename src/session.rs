//! Tracking sessions.
//!
//! `Tracker` owns at most one active session. `start` validates the source
//! and fixes the monitor area synchronously, then hands the loop to a
//! dedicated worker thread. The worker is the only writer of the shared
//! snapshot; `stop` is cooperative and waits a bounded time.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::annotate::{Annotator, Overlay};
use crate::area::{
    default_manual_area, estimate_auto_area, parse_manual_coords, AreaMethod,
};
use crate::capture::SnapshotWriter;
use crate::classifier::classify;
use crate::config::SessionRequest;
use crate::detect::SharedDetector;
use crate::error::{TrackerError, TrackerResult};
use crate::frame::Frame;
use crate::geometry::MonitorArea;
use crate::ingest::{next_frame, open_source, FrameSource, SourceKind, SourceSettings};
use crate::journal::EventJournal;
use crate::presence::PresenceStateMachine;
use crate::shared::{Publication, SharedState, StatusReport};

/// How long `stop` waits for the worker.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_PACING: Duration = Duration::from_millis(33);
const LIVE_PACING: Duration = Duration::from_millis(10);
const STOP_POLL: Duration = Duration::from_millis(10);

/// Validated options for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub source: SourceSettings,
    pub absence_threshold: Duration,
    pub confidence: f32,
    pub area_method: AreaMethod,
}

/// Process-wide settings shared by every session.
#[derive(Clone, Debug)]
pub struct TrackerSettings {
    pub output_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub snapshot_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output_frames"),
            uploads_dir: PathBuf::from("uploads"),
            snapshot_interval: Duration::from_secs(10),
        }
    }
}

struct ActiveSession {
    source: SourceSettings,
    generation: u64,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    session: Option<ActiveSession>,
    uploaded: Option<PathBuf>,
}

pub struct Tracker {
    shared: Arc<SharedState>,
    detector: SharedDetector,
    journal: Arc<EventJournal>,
    annotator: Annotator,
    settings: TrackerSettings,
    control: Mutex<Control>,
}

impl Tracker {
    pub fn new(
        detector: SharedDetector,
        journal: Arc<EventJournal>,
        annotator: Annotator,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(SharedState::new(annotator.clone())),
            detector,
            journal,
            annotator,
            settings,
            control: Mutex::new(Control::default()),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn journal(&self) -> &Arc<EventJournal> {
        &self.journal
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Start a session from client options.
    pub fn start_request(&self, request: SessionRequest) -> TrackerResult<MonitorArea> {
        let mut control = self.control();
        let config = request.into_config(control.uploaded.as_deref())?;
        self.start_locked(&mut control, config)
    }

    /// Start a session. Fails if one is already active.
    pub fn start(&self, config: SessionConfig) -> TrackerResult<MonitorArea> {
        let mut control = self.control();
        self.start_locked(&mut control, config)
    }

    fn start_locked(&self, control: &mut Control, config: SessionConfig) -> TrackerResult<MonitorArea> {
        if self.shared.is_running() {
            return Err(TrackerError::AlreadyRunning);
        }
        // A worker that ended on its own leaves a finished handle behind.
        if let Some(previous) = control.session.take() {
            reap(previous);
        }

        let mut preview = open_source(&config.source).map_err(|err| {
            self.journal.record(&format!(
                "Error: Could not open video source {}",
                config.source.locator
            ));
            err
        })?;
        let first = next_frame(preview.as_mut())?.ok_or_else(|| {
            TrackerError::source_unavailable(format!(
                "failed to read initial frame from {}",
                config.source.locator
            ))
        })?;
        let area = self.select_area(preview.as_mut(), &config, &first)?;
        drop(preview);

        let generation = self.shared.begin_session(area, config.source.kind);
        self.journal.record(&format!(
            "Tracking started using {} source",
            config.source.kind
        ));

        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            config: config.clone(),
            area,
            generation,
            stop: stop.clone(),
            shared: self.shared.clone(),
            detector: self.detector.clone(),
            journal: self.journal.clone(),
            annotator: self.annotator.clone(),
            settings: self.settings.clone(),
        };
        let join = thread::Builder::new()
            .name("deskwatch-tracker".to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                self.shared.mark_stopped(generation);
                TrackerError::Io(err)
            })?;

        control.session = Some(ActiveSession {
            source: config.source,
            generation,
            stop,
            join,
        });
        Ok(area)
    }

    fn select_area(
        &self,
        preview: &mut dyn FrameSource,
        config: &SessionConfig,
        first: &Frame,
    ) -> TrackerResult<MonitorArea> {
        match &config.area_method {
            AreaMethod::Manual(coords) => {
                match parse_manual_coords(coords, first.width(), first.height()) {
                    Ok(area) => {
                        self.journal
                            .record(&format!("Using manually specified area: {}", area));
                        Ok(area)
                    }
                    Err(err) => {
                        log::warn!("{}", err);
                        self.journal
                            .record("Failed to parse manual coords, using default area");
                        Ok(default_manual_area(first.width(), first.height()))
                    }
                }
            }
            AreaMethod::Auto => {
                self.journal.record("Detecting desk area...");
                let estimate =
                    estimate_auto_area(preview, &self.detector, config.confidence, first)?;
                if estimate.fallback {
                    self.journal
                        .record("Not enough desk objects detected. Using default desk area.");
                }
                self.journal
                    .record(&format!("Auto-detected desk area: {}", estimate.area));
                Ok(estimate.area)
            }
        }
    }

    /// Stop the active session, waiting up to `STOP_TIMEOUT` for the worker.
    pub fn stop(&self) -> TrackerResult<()> {
        let mut control = self.control();
        if !self.shared.is_running() {
            if let Some(previous) = control.session.take() {
                reap(previous);
            }
            return Err(TrackerError::NotRunning);
        }
        let Some(session) = control.session.take() else {
            return Err(TrackerError::NotRunning);
        };

        let ActiveSession {
            source,
            generation,
            stop,
            join,
        } = session;
        stop.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + STOP_TIMEOUT;
        while !join.is_finished() && Instant::now() < deadline {
            thread::sleep(STOP_POLL);
        }
        if !join.is_finished() {
            log::warn!(
                "tracker worker still busy after {:?}; detaching it",
                STOP_TIMEOUT
            );
        } else if join.join().is_err() {
            log::error!("tracker worker for {} panicked", source.locator);
        }
        self.shared.mark_stopped(generation);
        self.journal.record("Tracking system stopped");

        if source.kind == SourceKind::Upload {
            control.uploaded = None;
        }
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        self.shared.status()
    }

    pub fn current_frame_jpeg(&self) -> anyhow::Result<Vec<u8>> {
        self.shared.current_frame_jpeg()
    }

    pub fn logs(&self, max_lines: usize) -> anyhow::Result<Vec<String>> {
        self.journal.tail(max_lines)
    }

    pub fn monitor_area(&self) -> Option<MonitorArea> {
        self.shared.monitor_area()
    }

    pub fn uploaded_video(&self) -> Option<PathBuf> {
        self.control().uploaded.clone()
    }

    /// Use an existing video file for the next `upload` session.
    pub fn register_upload(&self, path: impl Into<PathBuf>) -> TrackerResult<()> {
        let path = path.into();
        let mut control = self.control();
        if self.shared.is_running() {
            return Err(TrackerError::AlreadyRunning);
        }
        if !path.is_file() {
            return Err(TrackerError::source_unavailable(format!(
                "uploaded video {} does not exist",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.journal.record(&format!("Video uploaded: {}", name));
        control.uploaded = Some(path);
        Ok(())
    }

    /// Store uploaded bytes as `<uploads_dir>/<unix_secs>_<name>` and register them.
    pub fn store_upload(&self, filename: &str, bytes: &[u8]) -> TrackerResult<PathBuf> {
        if self.shared.is_running() {
            return Err(TrackerError::AlreadyRunning);
        }
        let name = sanitize_filename(filename);
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        fs::create_dir_all(&self.settings.uploads_dir)?;
        let path = self.settings.uploads_dir.join(format!("{}_{}", secs, name));
        fs::write(&path, bytes)?;

        let mut control = self.control();
        if self.shared.is_running() {
            return Err(TrackerError::AlreadyRunning);
        }
        self.journal.record(&format!("Video uploaded: {}", name));
        control.uploaded = Some(path.clone());
        Ok(path)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Some(session) = self.control().session.as_ref() {
            session.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Join a finished worker, logging a panic if it had one.
fn reap(session: ActiveSession) {
    if !session.join.is_finished() {
        session.stop.store(true, Ordering::SeqCst);
        return;
    }
    if session.join.join().is_err() {
        log::error!(
            "tracker worker for {} (session {}) panicked",
            session.source.locator,
            session.generation
        );
    }
}

/// Keep only characters that are safe in a file name.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Marks the session stopped however the worker exits.
struct SessionGuard {
    shared: Arc<SharedState>,
    journal: Arc<EventJournal>,
    generation: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.journal.record("Error in tracking loop: worker panicked");
        }
        // A worker detached by `stop` may finish after the next session began.
        if self.shared.generation() != self.generation {
            log::info!("detached tracker worker for session {} finished", self.generation);
            return;
        }
        self.shared.mark_stopped(self.generation);
        self.journal.record("Tracking loop ended");
    }
}

struct Worker {
    config: SessionConfig,
    area: MonitorArea,
    generation: u64,
    stop: Arc<AtomicBool>,
    shared: Arc<SharedState>,
    detector: SharedDetector,
    journal: Arc<EventJournal>,
    annotator: Annotator,
    settings: TrackerSettings,
}

impl Worker {
    fn run(self) {
        let _guard = SessionGuard {
            shared: self.shared.clone(),
            journal: self.journal.clone(),
            generation: self.generation,
        };

        let mut source = match open_source(&self.config.source) {
            Ok(source) => source,
            Err(err) => {
                log::error!("tracking loop: {}", err);
                self.journal.record("Failed to open camera in tracking loop");
                return;
            }
        };

        let kind = self.config.source.kind;
        let pacing = if kind.is_file_backed() {
            FILE_PACING
        } else {
            LIVE_PACING
        };
        let mut presence = PresenceStateMachine::new(self.config.absence_threshold);
        let mut snapshots = SnapshotWriter::new(
            &self.settings.output_dir,
            self.settings.snapshot_interval,
            Instant::now(),
        );
        let mut looped = false;

        while !self.stop.load(Ordering::SeqCst) {
            let Some(frame) = self.read_frame(source.as_mut(), &mut looped) else {
                break;
            };
            let now = frame.captured_at;
            let wall = frame.captured_wall;

            let classification =
                classify(frame.image(), &self.area, self.config.confidence, &self.detector);
            if let Some(event) = presence.observe(classification.employee_detected, now) {
                self.journal.record(&event.to_string());
            }

            let mut image = frame.into_image();
            self.annotator.annotate(
                &mut image,
                &Overlay {
                    area: &self.area,
                    classification: &classification,
                    present: presence.is_present(),
                    absence: presence.absence_duration(now),
                    timestamp: wall,
                    source: kind,
                },
            );

            let snapshot = snapshots.is_due(Instant::now()).then(|| image.clone());
            let published = self.shared.publish(
                self.generation,
                Publication {
                    image,
                    phase: presence.phase(),
                    absence_started: presence.absence_started(),
                },
            );
            let Some(frames_processed) = published else {
                log::warn!("session {} superseded; worker exiting", self.generation);
                break;
            };
            if let Some(image) = snapshot {
                snapshots.maybe_save(&image, frames_processed, Instant::now());
            }

            thread::sleep(pacing);
        }

        let stats = source.stats();
        log::info!(
            "tracking loop read {} frames from {}",
            stats.frames_captured,
            stats.locator
        );
    }

    /// Next frame, rewinding file sources once at end of stream.
    fn read_frame(&self, source: &mut dyn FrameSource, looped: &mut bool) -> Option<Frame> {
        match next_frame(source) {
            Ok(Some(frame)) => return Some(frame),
            Ok(None) => {}
            Err(err) => log::warn!("tracking loop: {}", err),
        }

        if !source.is_rewindable() {
            self.journal.record("Failed to read frame, camera disconnected?");
            return None;
        }
        let retry = match source.rewind() {
            Ok(()) => next_frame(source),
            Err(err) => Err(TrackerError::frame_read(format!("{:#}", err))),
        };
        match retry {
            Ok(Some(frame)) => {
                if !*looped {
                    self.journal
                        .record("End of video reached, looping back to start");
                    *looped = true;
                }
                Some(frame)
            }
            Ok(None) | Err(_) => {
                self.journal.record("Failed to loop video, ending tracking");
                None
            }
        }
    }
}
