//! Server configuration loaded from `config.toml`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cadence_core::{Error, Result};
use cadence_player::{GainConfig, StreamConfig, WindowConfig};
use cadence_tasks::{ClearPolicy, TaskQueueOptions};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Config file name inside the platform config directory.
const CONFIG_FILE: &str = "config.toml";

/// Root configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreSettings,
    pub window: WindowSettings,
    pub gain: GainSettings,
    pub stream: StreamSettings,
    pub tasks: TaskSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `SQLite` file. Defaults to `cadence.db` in the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowSettings {
    pub predecessors: usize,
    pub successors: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        let defaults = WindowConfig::default();
        Self {
            predecessors: defaults.predecessors,
            successors: defaults.successors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GainSettings {
    pub preamp: f64,
    pub default_gain: f64,
}

impl Default for GainSettings {
    fn default() -> Self {
        let defaults = GainConfig::default();
        Self {
            preamp: defaults.preamp,
            default_gain: defaults.default_gain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Retained audio, and the idle time before the encoder is detached.
    pub lookback_secs: f64,
    pub pump_interval_ms: u64,
    pub hardware_output: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let defaults = StreamConfig::default();
        Self {
            lookback_secs: defaults.lookback.as_secs_f64(),
            pump_interval_ms: defaults.pump_interval.as_millis() as u64,
            hardware_output: defaults.hardware_output,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Concurrent scan tasks. Defaults to the host CPU count.
    pub max_concurrency: Option<usize>,
    /// Whether clearing the scan queue also cuts loose running scans.
    pub interrupt_running_on_clear: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default `tracing` filter, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "cadence=info".to_string(),
        }
    }
}

impl Config {
    /// `config.toml` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "cadence", "Cadence")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_toml(&text)
    }

    /// Load from the default path, falling back to defaults.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let lookback = self.stream.lookback_secs;
        if !lookback.is_finite() || lookback < 0.0 {
            return Err(Error::Config(format!(
                "stream.lookback_secs must be a non-negative number, got {lookback}"
            )));
        }
        if self.stream.pump_interval_ms == 0 {
            return Err(Error::Config("stream.pump_interval_ms must be positive".to_string()));
        }
        if !(self.gain.preamp.is_finite() && self.gain.preamp >= 0.0) {
            return Err(Error::Config(format!(
                "gain.preamp must be a non-negative number, got {}",
                self.gain.preamp
            )));
        }
        if self.tasks.max_concurrency == Some(0) {
            return Err(Error::Config("tasks.max_concurrency must be positive".to_string()));
        }
        Ok(())
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            predecessors: self.window.predecessors,
            successors: self.window.successors,
            gain: GainConfig {
                preamp: self.gain.preamp,
                default_gain: self.gain.default_gain,
            },
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        let defaults = StreamConfig::default();
        StreamConfig {
            lookback: Duration::try_from_secs_f64(self.stream.lookback_secs)
                .unwrap_or(defaults.lookback),
            pump_interval: Duration::from_millis(self.stream.pump_interval_ms.max(1)),
            hardware_output: self.stream.hardware_output,
        }
    }

    pub fn task_options(&self) -> TaskQueueOptions {
        let mut options = self
            .tasks
            .max_concurrency
            .map_or_else(TaskQueueOptions::default, TaskQueueOptions::with_max_concurrency);
        options.clear_policy = if self.tasks.interrupt_running_on_clear {
            ClearPolicy::PendingAndRunning
        } else {
            ClearPolicy::PendingOnly
        };
        options
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());

        let window = config.window_config();
        assert_eq!(window.predecessors, 1);
        assert_eq!(window.successors, 2);
        assert!((window.gain.preamp - 0.75).abs() < f64::EPSILON);
        assert!((window.gain.default_gain - 0.25).abs() < f64::EPSILON);

        let stream = config.stream_config();
        assert_eq!(stream.lookback, Duration::from_secs(8));
        assert_eq!(stream.pump_interval, Duration::from_millis(50));
        assert!(!stream.hardware_output);

        assert_eq!(config.task_options().clear_policy, ClearPolicy::PendingOnly);
        assert_eq!(config.log.filter, "cadence=info");
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            successors = 4

            [stream]
            lookback_secs = 2.5
            hardware_output = true

            [tasks]
            max_concurrency = 3
            interrupt_running_on_clear = true

            [log]
            filter = "cadence=debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.predecessors, 1);
        assert_eq!(config.window.successors, 4);
        assert_eq!(config.stream_config().lookback, Duration::from_millis(2500));
        assert!(config.stream_config().hardware_output);

        let options = config.task_options();
        assert_eq!(options.max_concurrency, 3);
        assert_eq!(options.clear_policy, ClearPolicy::PendingAndRunning);
        assert_eq!(config.log.filter, "cadence=debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml("[stream]\nlookback_secs = -1.0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[tasks]\nmax_concurrency = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[window]\nsuccessors = \"two\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file_and_store_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing, Config::default());

        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[store]\npath = \"/srv/music/cadence.db\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/srv/music/cadence.db"))
        );
    }
}
