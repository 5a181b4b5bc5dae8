use crate::classifier::ClassifierParams;
use crate::dispatch::{default_bindings, ActionBinding};
use crate::gesture::GestureLabel;
use crate::smoother::{DEFAULT_HISTORY, DEFAULT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Passed to the landmark detector; not re-applied here
    pub detection_confidence: f32,
    /// ONNX hand landmark model
    pub model_path: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detection_confidence: 0.5,
            model_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub confidence_threshold: f32,
    pub history_size: usize,
    /// Forget the smoothing window when the hand disappears
    pub clear_on_no_hand: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_THRESHOLD,
            history_size: DEFAULT_HISTORY,
            clear_on_no_hand: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub bindings: BTreeMap<GestureLabel, ActionBinding>,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            bindings: default_bindings(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction held out for the test accuracy report
    pub test_split: f64,
    pub seed: u64,
    pub samples_per_gesture: usize,
    pub capture_interval_ms: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_split: 0.2,
            seed: 42,
            samples_per_gesture: 50,
            capture_interval_ms: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Sample directories, and the trained model
    pub data_dir: PathBuf,
    /// Base name of the two model artifacts inside `data_dir`
    pub model_name: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            model_name: "gesture_model_random_forest".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn model_base(&self) -> PathBuf {
        self.data_dir.join(&self.model_name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Flip frames horizontally before detection
    pub mirror: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: 640,
            height: 480,
            fps: 30,
            mirror: true,
        }
    }
}

/// All tunables, read once at startup
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub gesture: GestureConfig,
    pub classifier: ClassifierParams,
    pub actions: ActionsConfig,
    pub training: TrainingConfig,
    pub paths: PathsConfig,
    pub camera: CameraConfig,
}

fn out_of_range(field: &'static str, expected: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        expected,
        value: value.to_string(),
    }
}

impl Config {
    /// Read a JSON config file. Missing sections and fields take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |v: f32| (0.0..=1.0).contains(&v);

        if !unit(self.detection.detection_confidence) {
            return Err(out_of_range(
                "detection.detection_confidence",
                "within [0, 1]",
                self.detection.detection_confidence,
            ));
        }
        if !unit(self.gesture.confidence_threshold) {
            return Err(out_of_range(
                "gesture.confidence_threshold",
                "within [0, 1]",
                self.gesture.confidence_threshold,
            ));
        }
        if self.gesture.history_size == 0 {
            return Err(out_of_range("gesture.history_size", "at least 1", 0));
        }
        if !(0.0..1.0).contains(&self.training.test_split) {
            return Err(out_of_range(
                "training.test_split",
                "within [0, 1)",
                self.training.test_split,
            ));
        }
        if self.actions.bindings.contains_key(&GestureLabel::Unknown) {
            return Err(out_of_range("actions.bindings", "free of UNKNOWN", "UNKNOWN"));
        }
        if self.camera.fps == 0 {
            return Err(out_of_range("camera.fps", "at least 1", 0));
        }
        Ok(())
    }

    /// Apply one cooldown to every binding
    pub fn set_cooldown_ms(&mut self, cooldown_ms: u64) {
        for binding in self.actions.bindings.values_mut() {
            binding.cooldown_ms = cooldown_ms;
        }
    }
}
