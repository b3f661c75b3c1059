//! deskwatchd - desk presence tracking daemon
//!
//! This daemon:
//! 1. Loads configuration (file from DESKWATCH_CONFIG, then env overrides)
//! 2. Loads the detector once for the process lifetime
//! 3. Serves the local HTTP API (start/stop, status, logs, MJPEG feed, uploads)
//! 4. Optionally starts a session right away (`autostart` in the config file)

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use deskwatch::{
    annotate::Annotator,
    api::{ApiConfig, ApiServer},
    config::{DeskwatchConfig, DetectorKind, DetectorSettings},
    detect::{self, NullBackend, SharedDetector},
    EventJournal, Tracker, TrackerSettings,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DeskwatchConfig::load()?;
    let detector = build_detector(&config.detector)?;
    let journal = Arc::new(EventJournal::open(&config.journal_path)?);

    let annotator = match &config.font_path {
        Some(path) => Annotator::from_font_file(path)?,
        None => {
            log::warn!("no font configured; frame labels will not be drawn");
            Annotator::default()
        }
    };

    let tracker = Arc::new(Tracker::new(
        detector,
        journal,
        annotator,
        TrackerSettings {
            output_dir: config.output_dir.clone(),
            uploads_dir: config.uploads_dir.clone(),
            snapshot_interval: config.snapshot_interval,
        },
    ));

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        captures_dir: config.output_dir.clone(),
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, tracker.clone()).spawn()?;
    log::info!("deskwatch api listening on {}", api_handle.addr);
    log::info!(
        "journal={}, captures={}, detector={:?}",
        config.journal_path.display(),
        config.output_dir.display(),
        config.detector.backend
    );

    if let Some(request) = config.autostart.clone() {
        match tracker.start_request(request) {
            Ok(area) => log::info!("autostart session monitoring {}", area),
            Err(e) => log::error!("autostart failed: {}", e),
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("deskwatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping tracker and API server...");
    if tracker.is_running() {
        if let Err(e) = tracker.stop() {
            log::warn!("tracker stop: {}", e);
        }
    }
    api_handle.stop()?;

    Ok(())
}

fn build_detector(settings: &DetectorSettings) -> Result<SharedDetector> {
    match settings.backend {
        DetectorKind::None => {
            log::warn!("detector backend 'none': every frame will report no people");
            Ok(detect::shared(NullBackend::new()))
        }
        DetectorKind::Tract => build_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<SharedDetector> {
    use deskwatch::detect::{DetectorBackend, TractBackend};

    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector backend 'tract' requires a model_path"))?;
    let mut backend = TractBackend::new(model_path, settings.input_size)?;
    backend.warm_up()?;
    log::info!("loaded detector model {}", model_path.display());
    Ok(detect::shared(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<SharedDetector> {
    Err(anyhow!(
        "detector backend 'tract' requires building with --features backend-tract"
    ))
}
