use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;

use tempfile::{tempdir, TempDir};

use deskwatch::annotate::Annotator;
use deskwatch::area::{AreaMethod, DEFAULT_MANUAL_COORDS};
use deskwatch::detect::{
    self, Detection, DetectorBackend, NullBackend, ScriptedBackend, SharedDetector,
};
use deskwatch::ingest::{SourceKind, SourceSettings};
use deskwatch::session::STOP_TIMEOUT;
use deskwatch::{
    EventJournal, MonitorArea, PixelBox, SessionConfig, SessionRequest, SessionStatus,
    Tracker, TrackerError, TrackerSettings,
};

struct Fixture {
    dir: TempDir,
    tracker: Tracker,
}

fn fixture(detector: SharedDetector) -> Fixture {
    let dir = tempdir().expect("tempdir");
    let journal = Arc::new(EventJournal::open(dir.path().join("employee_log.txt")).expect("journal"));
    let tracker = Tracker::new(
        detector,
        journal,
        Annotator::default(),
        TrackerSettings {
            output_dir: dir.path().join("frames"),
            uploads_dir: dir.path().join("uploads"),
            snapshot_interval: Duration::from_secs(3600),
        },
    );
    Fixture { dir, tracker }
}

fn session(kind: SourceKind, locator: &str) -> SessionConfig {
    SessionConfig {
        source: SourceSettings::new(kind, locator),
        absence_threshold: Duration::from_secs(5),
        confidence: 0.5,
        area_method: AreaMethod::Manual(DEFAULT_MANUAL_COORDS.to_string()),
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn journal_has(tracker: &Tracker, suffix: &str) -> bool {
    tracker
        .logs(500)
        .expect("read journal")
        .iter()
        .any(|line| line.ends_with(suffix))
}

fn journal_count(tracker: &Tracker, suffix: &str) -> usize {
    tracker
        .logs(500)
        .expect("read journal")
        .iter()
        .filter(|line| line.ends_with(suffix))
        .count()
}

#[test]
fn manual_area_is_selected_and_session_reports_active() {
    let fx = fixture(detect::shared(NullBackend::new()));
    let area = fx
        .tracker
        .start(session(SourceKind::Webcam, "stub://cam"))
        .expect("start");

    // 640x480 is normalized to 600x450 before area selection.
    assert_eq!(area, MonitorArea::new(60, 45, 540, 405).expect("area"));
    assert_eq!(fx.tracker.monitor_area(), Some(area));
    assert!(journal_has(&fx.tracker, "Using manually specified area: (60, 45, 540, 405)"));
    assert!(journal_has(&fx.tracker, "Tracking started using webcam source"));

    assert!(wait_until(Duration::from_secs(5), || fx.tracker.status().frames_processed > 0));
    let status = fx.tracker.status();
    assert_eq!(status.status, SessionStatus::Active);
    assert!(!status.employee_present);

    fx.tracker.stop().expect("stop");
}

#[test]
fn second_start_is_rejected_without_touching_the_session() {
    let fx = fixture(detect::shared(NullBackend::new()));
    let area = fx
        .tracker
        .start(session(SourceKind::Webcam, "stub://cam"))
        .expect("start");

    let mut other = session(SourceKind::Webcam, "stub://other");
    other.area_method = AreaMethod::Manual("0,0,100,100".to_string());
    assert!(matches!(
        fx.tracker.start(other),
        Err(TrackerError::AlreadyRunning)
    ));
    assert_eq!(fx.tracker.monitor_area(), Some(area));
    assert!(fx.tracker.is_running());

    fx.tracker.stop().expect("stop");
}

#[test]
fn stopping_twice_reports_not_running() {
    let fx = fixture(detect::shared(NullBackend::new()));
    fx.tracker
        .start(session(SourceKind::Webcam, "stub://cam"))
        .expect("start");
    assert!(wait_until(Duration::from_secs(5), || fx.tracker.status().frames_processed >= 2));

    fx.tracker.stop().expect("first stop");
    let frames = fx.tracker.status().frames_processed;
    assert_eq!(fx.tracker.status().status, SessionStatus::Inactive);
    assert!(journal_has(&fx.tracker, "Tracking system stopped"));

    assert!(matches!(fx.tracker.stop(), Err(TrackerError::NotRunning)));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fx.tracker.status().frames_processed, frames);
}

#[test]
fn live_source_end_finishes_the_session() {
    let fx = fixture(detect::shared(NullBackend::new()));
    fx.tracker
        .start(session(SourceKind::Webcam, "stub://cam?frames=3"))
        .expect("start");

    assert!(wait_until(Duration::from_secs(5), || !fx.tracker.is_running()));
    assert_eq!(fx.tracker.status().frames_processed, 3);
    assert!(journal_has(&fx.tracker, "Failed to read frame, camera disconnected?"));
    assert!(wait_until(Duration::from_secs(1), || journal_has(&fx.tracker, "Tracking loop ended")));

    // The finished worker is reaped and a new session may start.
    assert!(matches!(fx.tracker.stop(), Err(TrackerError::NotRunning)));
    fx.tracker
        .start(session(SourceKind::Webcam, "stub://cam?frames=1"))
        .expect("restart");
    assert!(wait_until(Duration::from_secs(5), || !fx.tracker.is_running()));
}

#[test]
fn file_source_loops_at_end_of_stream() {
    let fx = fixture(detect::shared(NullBackend::new()));
    fx.tracker
        .start(session(SourceKind::Upload, "stub://clip?frames=3"))
        .expect("start");

    assert!(wait_until(Duration::from_secs(5), || fx.tracker.status().frames_processed >= 8));
    assert!(fx.tracker.is_running());
    assert_eq!(
        journal_count(&fx.tracker, "End of video reached, looping back to start"),
        1
    );

    fx.tracker.stop().expect("stop");
}

#[test]
fn absence_and_return_are_journaled() {
    let at_desk = Detection::person(PixelBox::new(200, 150, 150, 200), 0.9);
    let backend = ScriptedBackend::runs(vec![
        (vec![at_desk.clone()], 3),
        (Vec::new(), 20),
        (vec![at_desk], 1),
    ]);
    let fx = fixture(detect::shared(backend));
    let mut config = session(SourceKind::Webcam, "stub://cam");
    config.absence_threshold = Duration::from_millis(50);
    fx.tracker.start(config).expect("start");

    assert!(wait_until(Duration::from_secs(10), || {
        journal_has(&fx.tracker, "Employee absence detected")
    }));
    assert!(wait_until(Duration::from_secs(10), || {
        fx.tracker
            .logs(500)
            .expect("read journal")
            .iter()
            .any(|line| line.contains("Employee returned after"))
    }));
    assert_eq!(journal_count(&fx.tracker, "Employee absence detected"), 1);
    assert!(fx.tracker.status().employee_present);

    fx.tracker.stop().expect("stop");
}

#[test]
fn unavailable_source_fails_start() {
    let fx = fixture(detect::shared(NullBackend::new()));
    let err = fx
        .tracker
        .start(session(SourceKind::Custom, "stub://offline"))
        .expect_err("offline source");
    assert!(matches!(err, TrackerError::SourceUnavailable(_)));
    assert!(!fx.tracker.is_running());
    assert!(journal_has(&fx.tracker, "Error: Could not open video source stub://offline"));
}

#[test]
fn upload_session_requires_a_stored_video() {
    let fx = fixture(detect::shared(NullBackend::new()));
    let request = SessionRequest {
        source_type: Some("upload".to_string()),
        ..SessionRequest::default()
    };
    assert!(matches!(
        fx.tracker.start_request(request),
        Err(TrackerError::NoUploadedVideo)
    ));

    let path = fx
        .tracker
        .store_upload("desk cam.mp4", b"not really a video")
        .expect("store upload");
    assert!(path.starts_with(fx.dir.path().join("uploads")));
    assert!(path.to_string_lossy().ends_with("_desk_cam.mp4"));
    assert_eq!(fx.tracker.uploaded_video(), Some(path));
    assert!(journal_has(&fx.tracker, "Video uploaded: desk_cam.mp4"));
}

#[test]
fn unsupported_sources_are_configuration_errors() {
    let fx = fixture(detect::shared(NullBackend::new()));
    for source_type in ["gdrive", "s3", "carrier-pigeon"] {
        let request = SessionRequest {
            source_type: Some(source_type.to_string()),
            ..SessionRequest::default()
        };
        assert!(matches!(
            fx.tracker.start_request(request),
            Err(TrackerError::Configuration(_))
        ));
    }
    assert!(!fx.tracker.is_running());
}

/// Blocks inside its first `detect` call, like a hung inference runtime.
struct StallingBackend {
    stall: Duration,
    calls: Arc<AtomicU64>,
}

impl DetectorBackend for StallingBackend {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn detect(&mut self, _image: &RgbImage, _confidence: f32) -> anyhow::Result<Vec<Detection>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(self.stall);
        }
        Ok(Vec::new())
    }
}

#[test]
fn stop_gives_up_on_a_stuck_worker_and_the_next_session_is_isolated() {
    let calls = Arc::new(AtomicU64::new(0));
    let stall = STOP_TIMEOUT + Duration::from_millis(1500);
    let fx = fixture(detect::shared(StallingBackend {
        stall,
        calls: calls.clone(),
    }));
    fx.tracker
        .start(session(SourceKind::Webcam, "stub://cam"))
        .expect("start");
    assert!(wait_until(Duration::from_secs(5), || calls.load(Ordering::SeqCst) > 0));

    let begun = Instant::now();
    fx.tracker.stop().expect("stop");
    let took = begun.elapsed();
    assert!(took >= STOP_TIMEOUT, "stop returned after {:?}", took);
    assert!(took < stall, "stop waited for the stuck worker ({:?})", took);
    assert_eq!(fx.tracker.status().status, SessionStatus::Inactive);
    assert_eq!(fx.tracker.status().frames_processed, 0);

    fx.tracker
        .start(session(SourceKind::Webcam, "stub://cam"))
        .expect("restart while the old worker is stuck");
    assert!(fx.tracker.is_running());

    // The old worker wakes up, loses its publish to the newer session, and exits.
    assert!(wait_until(Duration::from_secs(10), || {
        fx.tracker.status().frames_processed >= 3
    }));
    std::thread::sleep(Duration::from_millis(200));
    assert!(fx.tracker.is_running());
    assert_eq!(fx.tracker.status().status, SessionStatus::Active);
    assert_eq!(journal_count(&fx.tracker, "Tracking loop ended"), 0);
    assert_eq!(journal_count(&fx.tracker, "Tracking started using webcam source"), 2);

    fx.tracker.stop().expect("stop second session");
    assert!(journal_has(&fx.tracker, "Tracking loop ended"));
}
