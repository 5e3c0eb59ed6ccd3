use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{
    default_class_names, DetectParams, DEFAULT_CONFIDENCE, DEFAULT_IOU, DEFAULT_MAX_DETECTIONS,
};
use crate::ingest::{SourceSettings, DEFAULT_STUB_FRAMES};
use crate::session::{SessionConfig, DEFAULT_FRAME_INTERVAL, DEFAULT_MAX_CONSECUTIVE_FAILURES};

const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FPS: u32 = 30;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InspectConfigFile {
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    session: Option<SessionConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    max_detections: Option<usize>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SessionConfigFile {
    frame_interval_ms: Option<u64>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    frame_limit: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

/// Fully resolved inspection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectConfig {
    pub model: ModelSettings,
    pub detection: DetectParams,
    pub frame_interval: Duration,
    pub max_consecutive_failures: u32,
    pub source: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    /// Registry backend name (`tract`, `stub`).
    pub backend: String,
    pub path: PathBuf,
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub class_names: Vec<String>,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings {
                backend: DEFAULT_BACKEND.to_string(),
                path: PathBuf::from(DEFAULT_MODEL_PATH),
                input_size: DEFAULT_INPUT_SIZE,
                class_names: default_class_names(),
            },
            detection: DetectParams::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            source: SourceSettings::default(),
        }
    }
}

impl InspectConfig {
    /// Defaults, then the file named by `WELD_CONFIG`, then `WELD_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WELD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file without consulting `WELD_CONFIG`. Environment
    /// overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InspectConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let session = file.session.unwrap_or_default();
        let source = file.source.unwrap_or_default();

        Self {
            model: ModelSettings {
                backend: model.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                class_names: model.class_names.unwrap_or_else(default_class_names),
            },
            detection: DetectParams {
                confidence: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                max_detections: detection.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
                iou: detection.iou.unwrap_or(DEFAULT_IOU),
            },
            frame_interval: session
                .frame_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FRAME_INTERVAL),
            max_consecutive_failures: session
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            source: SourceSettings {
                frame_limit: source.frame_limit.unwrap_or(DEFAULT_STUB_FRAMES),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(backend) = env_non_empty("WELD_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(path) = env_non_empty("WELD_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(names) = env_non_empty("WELD_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.model.class_names = parsed;
            }
        }
        if let Some(value) = env_parsed::<f32>("WELD_CONFIDENCE", "a number")? {
            self.detection.confidence = value;
        }
        if let Some(value) = env_parsed::<usize>("WELD_MAX_DETECTIONS", "a positive integer")? {
            self.detection.max_detections = value;
        }
        if let Some(value) = env_parsed::<f32>("WELD_IOU", "a number")? {
            self.detection.iou = value;
        }
        if let Some(ms) =
            env_parsed::<u64>("WELD_FRAME_INTERVAL_MS", "an integer number of milliseconds")?
        {
            self.frame_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.detection
            .validate()
            .context("invalid detection settings")?;
        if self.model.backend.trim().is_empty() {
            return Err(anyhow!("model backend must not be empty"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input_size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if self.model.class_names.is_empty() {
            return Err(anyhow!("model class_names must not be empty"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be at least 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source size must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }
        Ok(())
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            params: self.detection,
            frame_interval: self.frame_interval,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

fn read_config_file(path: &Path) -> Result<InspectConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, expected: &str) -> Result<Option<T>> {
    match env_non_empty(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}, got '{}'", name, expected, value)),
        None => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = InspectConfig::from_file(InspectConfigFile::default());
        assert_eq!(cfg, InspectConfig::default());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.frame_interval, Duration::from_millis(30));
        assert_eq!(cfg.model.class_names, vec!["crack", "porosity", "lack_of_fusion"]);
    }

    #[test]
    fn session_config_carries_detection_settings() {
        let mut cfg = InspectConfig::default();
        cfg.detection.confidence = 0.6;
        cfg.max_consecutive_failures = 2;
        let session = cfg.session_config();
        assert_eq!(session.params.confidence, 0.6);
        assert_eq!(session.max_consecutive_failures, 2);
    }

    #[test]
    fn validate_rejects_odd_input_size() {
        let mut cfg = InspectConfig::default();
        cfg.model.input_size = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn csv_split_skips_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
    }
}
