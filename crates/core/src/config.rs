use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bpm_file::BpmFileConfig;
use crate::clip_table::{default_clip_references, ClipReference, ClipReferenceTable};
use crate::listener::{ListenerConfig, DEFAULT_BPM_PORT};
use crate::rate::{RateCalculator, BPM_EPSILON, NOMINAL_BPM};

/// Settings for the BPM sync host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub bind_address: IpAddr,
    pub listen_port: u16,
    pub tick_interval_ms: u32,
    pub stop_grace_ms: u32,
    pub initial_bpm: f32,
    pub epsilon: f32,
    pub nominal_bpm: f32,
    pub clip_references: Vec<ClipReference>,
    pub bpm_file: Option<PathBuf>,
    pub bpm_file_poll_ms: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            bind_address: ListenerConfig::default().bind_address,
            listen_port: DEFAULT_BPM_PORT,
            tick_interval_ms: 16,
            stop_grace_ms: 500,
            initial_bpm: NOMINAL_BPM,
            epsilon: BPM_EPSILON,
            nominal_bpm: NOMINAL_BPM,
            clip_references: default_clip_references(),
            bpm_file: None,
            bpm_file_poll_ms: 250,
        }
    }
}

impl SyncSettings {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            bind_address: self.bind_address,
            port: self.listen_port,
            stop_grace: Duration::from_millis(self.stop_grace_ms as u64),
            ..ListenerConfig::default()
        }
    }

    pub fn bpm_file_config(&self) -> Option<BpmFileConfig> {
        self.bpm_file.as_ref().map(|path| BpmFileConfig {
            path: path.clone(),
            poll_interval: Duration::from_millis(self.bpm_file_poll_ms as u64),
            stop_grace: Duration::from_millis(self.stop_grace_ms as u64),
        })
    }

    pub fn rate_calculator(&self) -> RateCalculator {
        RateCalculator::new(self.epsilon, self.nominal_bpm)
    }

    pub fn clip_table(&self) -> ClipReferenceTable {
        ClipReferenceTable::from_references(self.clip_references.iter().copied())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms as u64)
    }
}

/// Configuration manager for sync settings
/// Separates schema, available options, and persisted values. Settings are
/// stored in dancesync.json in the working directory by default
pub struct ConfigManager {
    config_path: PathBuf,
    settings: SyncSettings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub network: NetworkConfigSchema,
    pub timing: TimingConfigSchema,
    pub tempo: TempoConfigSchema,
    pub file: FileConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfigSchema {
    pub bind_address: ConfigOption<String>,
    pub listen_port: ConfigOption<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfigSchema {
    pub tick_interval_ms: ConfigOption<u32>,
    pub stop_grace_ms: ConfigOption<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfigSchema {
    pub initial_bpm: ConfigOption<f32>,
    pub epsilon: ConfigOption<f32>,
    pub nominal_bpm: ConfigOption<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfigSchema {
    pub bpm_file_poll_ms: ConfigOption<u32>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: SyncSettings,
    pub created_at: String,
    pub modified_at: String,
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    errors: &mut Vec<String>,
    name: &str,
    value: T,
    option: &ConfigOption<T>,
) {
    if let Some((min, max)) = &option.valid_range {
        // Written so NaN fails the check too
        if !(value >= *min && value <= *max) {
            errors.push(format!("{} must be between {} and {}", name, min, max));
        }
    }
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to 'dancesync.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("dancesync.json"));

        Self {
            config_path,
            settings: SyncSettings::default(),
        }
    }

    /// Load settings from configuration file
    /// Writes a default file when none exists yet
    pub fn load(&mut self) -> Result<SyncSettings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: now.clone(),
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Validate, then update settings and save to file
    pub fn update_settings(&mut self, settings: SyncSettings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        ConfigSchema {
            network: NetworkConfigSchema {
                bind_address: ConfigOption {
                    default: "0.0.0.0".to_string(),
                    valid_range: None,
                    valid_choices: None,
                    description: "Local address the BPM listener binds to".to_string(),
                    requires_restart: true,
                },
                listen_port: ConfigOption {
                    default: DEFAULT_BPM_PORT,
                    valid_range: Some((1024, 65535)),
                    valid_choices: None,
                    description: "UDP port for incoming BPM datagrams".to_string(),
                    requires_restart: true,
                },
            },
            timing: TimingConfigSchema {
                tick_interval_ms: ConfigOption {
                    default: 16,
                    valid_range: Some((1, 1000)),
                    valid_choices: None,
                    description: "How often pending BPM updates are applied".to_string(),
                    requires_restart: true,
                },
                stop_grace_ms: ConfigOption {
                    default: 500,
                    valid_range: Some((0, 10000)),
                    valid_choices: None,
                    description: "How long to wait for sources to stop before aborting them"
                        .to_string(),
                    requires_restart: false,
                },
            },
            tempo: TempoConfigSchema {
                initial_bpm: ConfigOption {
                    default: NOMINAL_BPM,
                    valid_range: Some((1.0, 400.0)),
                    valid_choices: None,
                    description: "Tempo assumed until the first BPM update arrives".to_string(),
                    requires_restart: false,
                },
                epsilon: ConfigOption {
                    default: BPM_EPSILON,
                    valid_range: Some((0.001, 10.0)),
                    valid_choices: None,
                    description: "Tempos below this are treated as unknown".to_string(),
                    requires_restart: false,
                },
                nominal_bpm: ConfigOption {
                    default: NOMINAL_BPM,
                    valid_range: Some((1.0, 400.0)),
                    valid_choices: None,
                    description: "Fallback reference tempo when no other is known".to_string(),
                    requires_restart: false,
                },
            },
            file: FileConfigSchema {
                bpm_file_poll_ms: ConfigOption {
                    default: 250,
                    valid_range: Some((10, 10000)),
                    valid_choices: None,
                    description: "Polling interval for the JSON BPM file".to_string(),
                    requires_restart: true,
                },
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &SyncSettings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        check_range(
            &mut errors,
            "listen_port",
            settings.listen_port,
            &schema.network.listen_port,
        );
        check_range(
            &mut errors,
            "tick_interval_ms",
            settings.tick_interval_ms,
            &schema.timing.tick_interval_ms,
        );
        check_range(
            &mut errors,
            "stop_grace_ms",
            settings.stop_grace_ms,
            &schema.timing.stop_grace_ms,
        );
        check_range(
            &mut errors,
            "initial_bpm",
            settings.initial_bpm,
            &schema.tempo.initial_bpm,
        );
        check_range(
            &mut errors,
            "epsilon",
            settings.epsilon,
            &schema.tempo.epsilon,
        );
        check_range(
            &mut errors,
            "nominal_bpm",
            settings.nominal_bpm,
            &schema.tempo.nominal_bpm,
        );
        check_range(
            &mut errors,
            "bpm_file_poll_ms",
            settings.bpm_file_poll_ms,
            &schema.file.bpm_file_poll_ms,
        );

        for reference in &settings.clip_references {
            if !(reference.reference_bpm.is_finite() && reference.reference_bpm > 0.0) {
                errors.push(format!(
                    "clip {} reference_bpm must be positive",
                    reference.index
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = SyncSettings::default();
        self.save()
    }
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
    #[error("Config validation errors: {}", .0.join(", "))]
    ValidationError(Vec<String>),
}
