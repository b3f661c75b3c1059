//! deskwatch_demo - run a tracking session against synthetic input
//!
//! A scripted detector alternates between "person at desk" and "empty desk",
//! so the journal shows confirmed absences and returns without a camera or
//! a model. Frames come from a `stub://` source treated as an uploaded video.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deskwatch::{
    annotate::Annotator,
    area::{AreaMethod, DEFAULT_MANUAL_COORDS},
    detect::{self, Detection, ScriptedBackend},
    ingest::{SourceKind, SourceSettings},
    EventJournal, PixelBox, SessionConfig, Tracker, TrackerSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Desk presence tracking demo on synthetic frames")]
struct Args {
    /// Frames per scripted run while the employee sits at the desk.
    #[arg(long, default_value_t = 60)]
    present_frames: usize,

    /// Frames per scripted run while the desk is empty.
    #[arg(long, default_value_t = 150)]
    absent_frames: usize,

    /// Seconds of absence before it is confirmed.
    #[arg(long, default_value_t = 2.0)]
    threshold: f64,

    /// How long to run before stopping.
    #[arg(long, default_value_t = 12)]
    seconds: u64,

    /// Directory for the journal and periodic snapshots.
    #[arg(long, default_value = "deskwatch-demo")]
    workdir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // Default manual area on a 600x450 working frame is (60, 45, 540, 405).
    let at_desk = Detection::person(PixelBox::new(200, 150, 150, 200), 0.91);
    let backend = ScriptedBackend::runs(vec![
        (vec![at_desk], args.present_frames),
        (Vec::new(), args.absent_frames),
    ])
    .looping(true);

    let journal = Arc::new(EventJournal::open(args.workdir.join("employee_log.txt"))?);
    let tracker = Tracker::new(
        detect::shared(backend),
        journal,
        Annotator::default(),
        TrackerSettings {
            output_dir: args.workdir.join("output_frames"),
            uploads_dir: args.workdir.join("uploads"),
            snapshot_interval: Duration::from_secs(5),
        },
    );

    let area = tracker.start(SessionConfig {
        source: SourceSettings::new(SourceKind::Upload, "stub://demo?width=640&height=480"),
        absence_threshold: Duration::try_from_secs_f64(args.threshold)?,
        confidence: 0.5,
        area_method: AreaMethod::Manual(DEFAULT_MANUAL_COORDS.to_string()),
    })?;
    println!("monitoring {}", area);

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(args.seconds) {
        std::thread::sleep(Duration::from_secs(1));
        println!("{}", serde_json::to_string(&tracker.status())?);
    }
    tracker.stop()?;

    println!("--- journal ---");
    for line in tracker.logs(50)? {
        println!("{}", line);
    }
    Ok(())
}
