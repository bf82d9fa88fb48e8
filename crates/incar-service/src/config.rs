//! Engine configuration management and validation
//!
//! One JSON document with a section per subsystem. A missing file is
//! replaced by the defaults (and written out so users can edit it); an
//! unparsable file logs a warning and the defaults are used for this run.

use anyhow::{Context, Result};
use incar_actuation::ActuationConfig;
use incar_telemetry::{
    DEFAULT_CONTROL_PREFIX, DEFAULT_POLL_HZ, ReaderConfig, StalenessConfig,
};
use incar_timing::{CalibrationConfig, TimingSelection};
use incar_watchdog::WatchdogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory name under the per-user application data location.
pub const APP_DIR: &str = "incar";

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub telemetry: TelemetrySettings,
    pub actuation: ActuationSettings,
    pub watchdog: WatchdogConfig,
    pub profiles: ProfileSettings,
    pub input: InputSettings,
}

/// Where telemetry snapshots come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// JSON frames written by an external telemetry bridge
    #[default]
    SnapshotFile,
    /// Built-in simulated car, for demos
    Simulated,
}

/// Telemetry polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub poll_hz: u32,
    pub stale_after_misses: u32,
    pub disconnect_after_misses: u32,
    pub source: SourceKind,
    /// Bridge output file; defaults to `<app-data>/incar/telemetry.json`
    pub snapshot_path: Option<PathBuf>,
    /// Prefix of driver-adjustable telemetry variables
    pub control_prefix: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        let staleness = StalenessConfig::default();
        Self {
            poll_hz: DEFAULT_POLL_HZ,
            stale_after_misses: staleness.stale_after_misses,
            disconnect_after_misses: staleness.disconnect_after_misses,
            source: SourceKind::default(),
            snapshot_path: None,
            control_prefix: DEFAULT_CONTROL_PREFIX.to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Reader timing derived from these settings
    pub fn reader_config(&self) -> ReaderConfig {
        let mut reader = ReaderConfig::from_hz(self.poll_hz);
        reader.staleness = StalenessConfig {
            stale_after_misses: self.stale_after_misses,
            disconnect_after_misses: self.disconnect_after_misses,
        };
        reader
    }

    /// Longest healthy gap between two poll-loop turns
    pub fn loop_interval(&self) -> Duration {
        let reader = self.reader_config();
        reader.poll_interval.saturating_add(reader.read_timeout)
    }
}

/// Actuation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationSettings {
    /// Timing used until a profile selects its own
    pub default_timing: TimingSelection,
    /// Schedule for measuring the shortest pulse the simulator registers
    pub calibration: CalibrationConfig,
    #[serde(flatten)]
    pub engine: ActuationConfig,
}

/// Profile storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Overrides `<app-data>/incar/profiles`
    pub dir: Option<PathBuf>,
}

/// Input front-end configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    /// Route `VOICE:` inputs; when off they are ignored
    pub voice_enabled: bool,
    /// Capacity of the shared input queue
    pub queue_capacity: usize,
    /// HID devices whose buttons are accepted; empty accepts all
    pub allowed_devices: Vec<String>,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            voice_enabled: true,
            queue_capacity: incar_input::DEFAULT_INPUT_QUEUE,
            allowed_devices: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// Returns the configuration and the path it belongs to.
    pub async fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let config = Self::load_from_path(&path).await?;
        Ok((config, path))
    }

    /// Load configuration from a specific path
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(path = ?path, "Config file not found, creating default");
            let config = Self::default();
            config.save_to_path(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        match serde_json::from_str::<EngineConfig>(&content) {
            Ok(config) => {
                debug!(path = ?path, "Loaded config");
                Ok(config)
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Config file unparsable; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save configuration to a specific path
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!(path = ?path, "Saved config");
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.telemetry.poll_hz == 0 || self.telemetry.poll_hz > 1000 {
            anyhow::bail!("Invalid poll rate: {} Hz", self.telemetry.poll_hz);
        }
        self.telemetry
            .reader_config()
            .staleness
            .validate()
            .context("Invalid telemetry staleness thresholds")?;
        if self.telemetry.control_prefix.is_empty() {
            anyhow::bail!("telemetry.control_prefix must not be empty");
        }

        self.actuation
            .engine
            .validate()
            .context("Invalid actuation configuration")?;
        self.actuation
            .default_timing
            .validate()
            .context("Invalid default timing")?;
        self.actuation
            .calibration
            .validate()
            .context("Invalid timing calibration")?;

        self.watchdog
            .validate()
            .context("Invalid watchdog configuration")?;

        if self.input.queue_capacity == 0 {
            anyhow::bail!("input.queue_capacity must be greater than 0");
        }
        Ok(())
    }

    /// Directory holding profile records
    pub fn profiles_dir(&self) -> Result<PathBuf> {
        match &self.profiles.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(app_data_dir()?.join("profiles")),
        }
    }

    /// File the snapshot source reads
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        match &self.telemetry.snapshot_path {
            Some(path) => Ok(path.clone()),
            None => Ok(app_data_dir()?.join("telemetry.json")),
        }
    }
}

/// Per-user application data directory for incar
pub fn app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(windows) {
        PathBuf::from(std::env::var("APPDATA").context("APPDATA environment variable not set")?)
    } else if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(xdg)
    } else {
        PathBuf::from(std::env::var("HOME").context("HOME environment variable not set")?)
            .join(".config")
    };
    Ok(base.join(APP_DIR))
}

/// Get default configuration file path
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join("config.json"))
}
