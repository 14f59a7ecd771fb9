use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::track::TrackerConfig;

pub const CONFIG_ENV: &str = "LYCHEE_CONFIG";

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_SCHEMA_VERSION: &str = "v1";
const DEFAULT_MAX_UPLOAD_MB: u64 = 10;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_YOLO_VERSION: &str = "yolo11n";
const DEFAULT_MODEL_VERSION: &str = "1.0.0";
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct LycheeConfigFile {
    service: Option<ServiceConfigFile>,
    model: Option<ModelConfigFile>,
    tracker: Option<TrackerConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    addr: Option<String>,
    schema_version: Option<String>,
    max_upload_mb: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    yolo_version: Option<String>,
    model_version: Option<String>,
    model_path: Option<String>,
    conf_threshold: Option<f32>,
    nms_iou: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LycheeConfig {
    pub api_addr: String,
    pub schema_version: String,
    pub max_upload_mb: u64,
    pub model: ModelSettings,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Registry key of the detector backend.
    pub backend: String,
    pub yolo_version: String,
    pub model_version: String,
    /// Explicit weights path; empty means derive from `yolo_version`.
    pub model_path: String,
    pub conf_threshold: f32,
    pub nms_iou: f32,
    /// Square model input side in pixels.
    pub input_size: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            yolo_version: DEFAULT_YOLO_VERSION.to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            model_path: String::new(),
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            nms_iou: DEFAULT_NMS_IOU,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl ModelSettings {
    /// Weights file to load: explicit path, else `<yolo_version>.onnx`.
    pub fn model_source(&self) -> Result<PathBuf> {
        let configured = self.model_path.trim();
        if !configured.is_empty() {
            return Ok(PathBuf::from(configured));
        }
        let version = self.yolo_version.trim();
        if version.is_empty() {
            return Err(anyhow!("yolo_version must be set when model_path is empty"));
        }
        if version.ends_with(".onnx") {
            return Ok(PathBuf::from(version));
        }
        Ok(PathBuf::from(format!("{version}.onnx")))
    }
}

impl LycheeConfig {
    /// Load from the file named by `LYCHEE_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => {
                ensure_config_file(path, CONFIG_ENV)?;
                Some(read_config_file(path)?)
            }
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }

    fn from_file(file: LycheeConfigFile) -> Self {
        let service = file.service.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let defaults = ModelSettings::default();
        Self {
            api_addr: service
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            schema_version: service
                .schema_version
                .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string()),
            max_upload_mb: service.max_upload_mb.unwrap_or(DEFAULT_MAX_UPLOAD_MB),
            model: ModelSettings {
                backend: model.backend.unwrap_or(defaults.backend),
                yolo_version: model.yolo_version.unwrap_or(defaults.yolo_version),
                model_version: model.model_version.unwrap_or(defaults.model_version),
                model_path: model.model_path.unwrap_or(defaults.model_path),
                conf_threshold: model.conf_threshold.unwrap_or(defaults.conf_threshold),
                nms_iou: model.nms_iou.unwrap_or(defaults.nms_iou),
                input_size: model.input_size.unwrap_or(defaults.input_size),
            },
            tracker: file.tracker.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("LYCHEE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(backend) = non_empty_env("LYCHEE_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(path) = non_empty_env("LYCHEE_MODEL_PATH") {
            self.model.model_path = path;
        }
        if let Some(version) = non_empty_env("LYCHEE_MODEL_VERSION") {
            self.model.model_version = version;
        }
        if let Some(mb) = non_empty_env("LYCHEE_MAX_UPLOAD_MB") {
            self.max_upload_mb = mb
                .trim()
                .parse()
                .map_err(|_| anyhow!("LYCHEE_MAX_UPLOAD_MB must be an integer number of MiB"))?;
        }
        if let Some(conf) = non_empty_env("LYCHEE_CONF_THRESHOLD") {
            self.model.conf_threshold = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("LYCHEE_CONF_THRESHOLD must be a number"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.model.backend = self.model.backend.trim().to_lowercase();
        if self.model.backend.is_empty() {
            return Err(anyhow!("model backend must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.model.conf_threshold) {
            return Err(anyhow!("conf_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.model.nms_iou) {
            return Err(anyhow!("nms_iou must be within [0, 1]"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!("input_size must be a positive multiple of 32"));
        }
        if !(self.tracker.iou_threshold > 0.0 && self.tracker.iou_threshold <= 1.0) {
            return Err(anyhow!("tracker iou_threshold must be within (0, 1]"));
        }
        if self.max_upload_mb == 0 {
            return Err(anyhow!("max_upload_mb must be greater than zero"));
        }
        Ok(())
    }
}

/// Fail with an actionable message when a configured file is missing.
pub fn ensure_config_file(path: &Path, env_var: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let example = PathBuf::from(format!("{}.example", path.display()));
    let hint = if example.exists() {
        format!(" Copy '{}' to '{}'.", example.display(), path.display())
    } else {
        String::new()
    };
    Err(anyhow!(
        "Missing config file: '{}'. Set {} to an existing file.{}",
        path.display(),
        env_var,
        hint
    ))
}

fn read_config_file(path: &Path) -> Result<LycheeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_source_uses_explicit_path() {
        let settings = ModelSettings {
            yolo_version: "yolo26n".into(),
            model_path: "weights/custom.onnx".into(),
            ..ModelSettings::default()
        };
        assert_eq!(
            settings.model_source().unwrap(),
            PathBuf::from("weights/custom.onnx")
        );
    }

    #[test]
    fn model_source_falls_back_to_yolo_version() {
        let settings = ModelSettings {
            yolo_version: "yolo26n".into(),
            ..ModelSettings::default()
        };
        assert_eq!(settings.model_source().unwrap(), PathBuf::from("yolo26n.onnx"));

        let settings = ModelSettings {
            yolo_version: " ".into(),
            ..ModelSettings::default()
        };
        assert!(settings.model_source().is_err());
    }

    #[test]
    fn defaults_validate() {
        let mut cfg = LycheeConfig::from_file(LycheeConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(cfg.tracker, TrackerConfig::default());
    }

    #[test]
    fn validate_rejects_out_of_range_thresholds() {
        let mut cfg = LycheeConfig::from_file(LycheeConfigFile::default());
        cfg.model.conf_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = LycheeConfig::from_file(LycheeConfigFile::default());
        cfg.tracker.iou_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = LycheeConfig::from_file(LycheeConfigFile::default());
        cfg.model.input_size = 100;
        assert!(cfg.validate().is_err());
    }
}
