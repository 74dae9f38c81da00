// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration schema and startup selection.
//!
//! The whole configuration is one structured blob delivered at startup; no
//! hot-reload. Topology is selected through `VISIFRUIT_MODE`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::FruitCategory;

/// Command-line surface of the `visifruit` binary.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "visifruit", about = "Fruit labeling and classification controller")]
pub struct Cli {
    /// Path to the configuration JSON file.
    #[arg(long, default_value = "visifruit.json", env = "VISIFRUIT_CONFIG")]
    pub config: PathBuf,

    /// Topology selection: professional, prototype, interactive or auto.
    #[arg(long, default_value = "auto", env = "VISIFRUIT_MODE")]
    pub mode: RunMode,

    /// Override the API bind host.
    #[arg(long, env = "VISIFRUIT_HOST")]
    pub host: Option<String>,

    /// Override the API bind port.
    #[arg(long, env = "VISIFRUIT_PORT")]
    pub port: Option<u16>,
}

/// Process topology mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Full 6-labeler / 3-diverter topology.
    Professional,
    /// Single-labeler / 3-servo variant.
    Prototype,
    /// Professional topology with manual stepping from the console.
    Interactive,
    /// Select professional when the professional config file is present.
    Auto,
}

impl RunMode {
    /// Resolve `auto` against the filesystem; other modes pass through.
    pub fn resolve(self, professional_config: &Path) -> RunMode {
        match self {
            RunMode::Auto => {
                if professional_config.exists() {
                    RunMode::Professional
                } else {
                    RunMode::Prototype
                }
            }
            other => other,
        }
    }
}

// -- Schema -------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system_settings: SystemSettings,
    pub camera_settings: CameraSettings,
    pub ai_model_settings: AiModelSettings,
    pub conveyor_belt_settings: BeltSettings,
    pub labeler_settings: LabelerSettings,
    pub sensor_settings: SensorSettings,
    pub motor_controller_settings: MotorSettings,
    pub diverter_settings: DiverterSettings,
    pub pipeline_settings: PipelineSettings,
    pub api_settings: ApiSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_settings: SystemSettings::default(),
            camera_settings: CameraSettings::default(),
            ai_model_settings: AiModelSettings::default(),
            conveyor_belt_settings: BeltSettings::default(),
            labeler_settings: LabelerSettings::default(),
            sensor_settings: SensorSettings::default(),
            motor_controller_settings: MotorSettings::default(),
            diverter_settings: DiverterSettings::default(),
            pipeline_settings: PipelineSettings::default(),
            api_settings: ApiSettings::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file. A missing file yields the defaults so the
    /// simulation topology runs with zero setup.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot drive the line.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.conveyor_belt_settings.belt_speed_mps <= 0.0 {
            anyhow::bail!("conveyor_belt_settings.belt_speed_mps must be positive");
        }
        if self.ai_model_settings.num_workers == 0 {
            anyhow::bail!("ai_model_settings.num_workers must be at least 1");
        }
        if self.ai_model_settings.max_queue_size == 0 {
            anyhow::bail!("ai_model_settings.max_queue_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.ai_model_settings.confidence_threshold) {
            anyhow::bail!("ai_model_settings.confidence_threshold must be within [0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub installation_id: String,
    pub system_name: String,
    pub log_level: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            installation_id: "visifruit-dev".to_owned(),
            system_name: "VisiFruit".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(rename = "type")]
    pub kind: CameraKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    Usb,
    Csi,
    Mock,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self { width: 640, height: 480, fps: 30, kind: CameraKind::Mock }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiModelSettings {
    pub model_path: PathBuf,
    pub confidence_threshold: f64,
    pub num_workers: usize,
    pub request_timeout_s: f64,
    pub max_queue_size: usize,
    /// Per-worker adaptive confidence threshold. Default off.
    pub adaptive_threshold: bool,
}

impl Default for AiModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/fruit.onnx"),
            confidence_threshold: 0.65,
            num_workers: 2,
            request_timeout_s: 10.0,
            max_queue_size: 50,
            adaptive_threshold: false,
        }
    }
}

impl AiModelSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeltSettings {
    pub belt_speed_mps: f64,
    pub pin_forward_relay: u8,
    pub pin_backward_relay: u8,
    pub is_active_low: bool,
}

impl Default for BeltSettings {
    fn default() -> Self {
        Self {
            belt_speed_mps: 0.5,
            pin_forward_relay: 22,
            pin_backward_relay: 23,
            is_active_low: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelerSettings {
    /// First solenoid pin; heads occupy `base_pin .. base_pin + 6`.
    pub base_pin: u8,
    pub activation_duration_s: f64,
    pub distance_camera_to_labeler_m: f64,
    /// Compensation for solenoid actuation latency. Default 0.
    pub preroll_s: f64,
}

impl Default for LabelerSettings {
    fn default() -> Self {
        Self {
            base_pin: 5,
            activation_duration_s: 2.0,
            distance_camera_to_labeler_m: 0.5,
            preroll_s: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub trigger: TriggerSettings,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self { trigger: TriggerSettings::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub pin: u8,
    pub debounce_ms: u64,
    pub active_state: ActiveState,
    /// Fire a label applicator stepper directly on each edge, bypassing
    /// detection. A configurable shortcut, default off.
    pub direct_fire: bool,
    /// Rate limit for the direct-fire shortcut.
    pub min_interval_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActiveState {
    Low,
    High,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            pin: 17,
            debounce_ms: 50,
            active_state: ActiveState::High,
            direct_fire: false,
            min_interval_s: 0.5,
        }
    }
}

impl TriggerSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorSettings {
    pub pwm_pin: u8,
    pub dir_pin1: u8,
    pub dir_pin2: u8,
    pub enable_pin: u8,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self { pwm_pin: 12, dir_pin1: 20, dir_pin2: 21, enable_pin: 16 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiverterSettings {
    pub enabled: bool,
    pub activation_duration_s: f64,
    pub distance_labeler_to_diverter_m: f64,
    pub diverters: Vec<DiverterChannel>,
}

impl Default for DiverterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_duration_s: 1.0,
            distance_labeler_to_diverter_m: 1.0,
            diverters: vec![
                DiverterChannel {
                    pin: 18,
                    straight_angle: 0.0,
                    diverted_angle: 55.0,
                    category: FruitCategory::Apple,
                },
                DiverterChannel {
                    pin: 19,
                    straight_angle: 0.0,
                    diverted_angle: 55.0,
                    category: FruitCategory::Pear,
                },
                DiverterChannel {
                    pin: 26,
                    straight_angle: 0.0,
                    diverted_angle: 55.0,
                    category: FruitCategory::Lemon,
                },
            ],
        }
    }
}

impl DiverterSettings {
    pub fn activation_duration(&self) -> Duration {
        Duration::from_secs_f64(self.activation_duration_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiverterChannel {
    pub pin: u8,
    pub straight_angle: f64,
    pub diverted_angle: f64,
    pub category: FruitCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Predictive pre-positioning from trigger history. Default off.
    pub predictive_positioning: bool,
    /// Labeler group fired per trigger when the detector is unavailable
    /// (sensor-only degraded mode).
    pub default_group: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { predictive_positioning: false, default_group: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self { enabled: true, host: "127.0.0.1".to_owned(), port: 8000 }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
