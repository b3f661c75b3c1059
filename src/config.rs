use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::area::{AreaMethod, DEFAULT_MANUAL_COORDS};
use crate::error::{TrackerError, TrackerResult};
use crate::ingest::{SourceKind, SourceSettings};
use crate::session::SessionConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_JOURNAL_PATH: &str = "logs/employee_log.txt";
const DEFAULT_OUTPUT_DIR: &str = "output_frames";
const DEFAULT_UPLOADS_DIR: &str = "uploads";
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 10;
const DEFAULT_INPUT_SIZE: u32 = 416;

pub const DEFAULT_ABSENCE_THRESHOLD_SECS: f64 = 5.0;
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_CAMERA_SOURCE: &str = "0";

#[derive(Debug, Deserialize, Default)]
struct DeskwatchConfigFile {
    api: Option<ApiConfigFile>,
    journal_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    uploads_dir: Option<PathBuf>,
    font_path: Option<PathBuf>,
    snapshot_interval_secs: Option<u64>,
    detector: Option<DetectorConfigFile>,
    autostart: Option<SessionRequest>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

/// Which detector backend the daemon loads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// No model; every frame has zero detections.
    None,
    /// ONNX model run with tract (feature `backend-tract`).
    Tract,
}

impl std::str::FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" => Ok(DetectorKind::None),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct DeskwatchConfig {
    pub api_addr: String,
    pub journal_path: PathBuf,
    pub output_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub font_path: Option<PathBuf>,
    pub snapshot_interval: Duration,
    pub detector: DetectorSettings,
    pub autostart: Option<SessionRequest>,
}

impl DeskwatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DESKWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DeskwatchConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        Self {
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            journal_path: file
                .journal_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_JOURNAL_PATH)),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            uploads_dir: file
                .uploads_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR)),
            font_path: file.font_path,
            snapshot_interval: Duration::from_secs(
                file.snapshot_interval_secs
                    .unwrap_or(DEFAULT_SNAPSHOT_INTERVAL_SECS),
            ),
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(DetectorKind::None),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            autostart: file.autostart,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("DESKWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = non_empty_env("DESKWATCH_JOURNAL_PATH") {
            self.journal_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("DESKWATCH_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("DESKWATCH_UPLOADS_DIR") {
            self.uploads_dir = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("DESKWATCH_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = non_empty_env("DESKWATCH_DETECTOR") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = non_empty_env("DESKWATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Ok(interval) = std::env::var("DESKWATCH_SNAPSHOT_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("DESKWATCH_SNAPSHOT_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.snapshot_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.snapshot_interval.is_zero() {
            return Err(anyhow!("snapshot interval must be greater than zero"));
        }
        if self.detector.backend == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("detector backend 'tract' requires a model_path"));
        }
        let size = self.detector.input_size;
        if size == 0 || size % 32 != 0 {
            return Err(anyhow!(
                "detector input_size must be a positive multiple of 32, got {}",
                size
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<DeskwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// A number that clients may also send as a string (`5` or `"5"`).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self, field: &str) -> TrackerResult<f64> {
        match self {
            Numeric::Number(n) => Ok(*n),
            Numeric::Text(text) => text.trim().parse().map_err(|_| {
                TrackerError::configuration(format!("{} must be a number, got '{}'", field, text))
            }),
        }
    }
}

/// Camera index (`0`) or a path/URL.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CameraSource {
    Index(u64),
    Locator(String),
}

impl CameraSource {
    fn locator(&self) -> String {
        match self {
            CameraSource::Index(index) => index.to_string(),
            CameraSource::Locator(locator) => locator.trim().to_string(),
        }
    }
}

/// Session options as sent by clients. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SessionRequest {
    #[serde(default, alias = "sourceType")]
    pub source_type: Option<String>,
    #[serde(default, alias = "cameraSource")]
    pub camera_source: Option<CameraSource>,
    #[serde(default, alias = "absenceThreshold")]
    pub absence_threshold: Option<Numeric>,
    #[serde(default)]
    pub confidence: Option<Numeric>,
    #[serde(default, alias = "areaMethod")]
    pub area_method: Option<String>,
    #[serde(default, alias = "manualCoords")]
    pub manual_coords: Option<String>,
}

impl SessionRequest {
    /// Validate and apply defaults.
    ///
    /// `uploaded` is the most recently registered upload, required for the
    /// `upload` source type.
    pub fn into_config(self, uploaded: Option<&Path>) -> TrackerResult<SessionConfig> {
        let source_type = self
            .source_type
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "webcam".to_string());
        let source = match source_type.as_str() {
            "webcam" => SourceSettings::new(
                SourceKind::Webcam,
                self.camera_source
                    .as_ref()
                    .map(CameraSource::locator)
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            ),
            "custom" => {
                let locator = self
                    .camera_source
                    .as_ref()
                    .map(CameraSource::locator)
                    .unwrap_or_default();
                if locator.is_empty() {
                    return Err(TrackerError::configuration(
                        "custom source requires a camera_source URL",
                    ));
                }
                SourceSettings::new(SourceKind::Custom, locator)
            }
            "upload" => {
                let path = uploaded.ok_or(TrackerError::NoUploadedVideo)?;
                SourceSettings::new(SourceKind::Upload, path.to_string_lossy())
            }
            "gdrive" | "s3" => {
                return Err(TrackerError::configuration(format!(
                    "{} source not yet implemented",
                    source_type
                )))
            }
            other => {
                return Err(TrackerError::configuration(format!(
                    "unsupported source type '{}'",
                    other
                )))
            }
        };

        let absence_threshold = match &self.absence_threshold {
            Some(value) => value.value("absence_threshold")?,
            None => DEFAULT_ABSENCE_THRESHOLD_SECS,
        };
        let absence_threshold = Duration::try_from_secs_f64(absence_threshold).map_err(|_| {
            TrackerError::configuration(format!(
                "absence_threshold must be a non-negative number of seconds, got {}",
                absence_threshold
            ))
        })?;

        let confidence = match &self.confidence {
            Some(value) => value.value("confidence")?,
            None => DEFAULT_CONFIDENCE,
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(TrackerError::configuration(format!(
                "confidence must be within [0, 1], got {}",
                confidence
            )));
        }

        let area_method = match self.area_method.as_deref().map(str::trim) {
            None | Some("") | Some("auto") => AreaMethod::Auto,
            Some("manual") => AreaMethod::Manual(
                self.manual_coords
                    .unwrap_or_else(|| DEFAULT_MANUAL_COORDS.to_string()),
            ),
            Some(other) => {
                return Err(TrackerError::configuration(format!(
                    "unsupported area method '{}'",
                    other
                )))
            }
        };

        Ok(SessionConfig {
            source,
            absence_threshold,
            confidence: confidence as f32,
            area_method,
        })
    }
}
