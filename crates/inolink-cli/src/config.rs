//! Configuration Vault – reads/writes `~/.inolink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inolink_hal::{LinkSettings, SIM_PORT};
use inolink_middleware::DEFAULT_QUEUE_CAPACITY;
use inolink_runtime::PollInterval;
use inolink_types::{Dimension, InoError, Unit};
use serde::{Deserialize, Serialize};

/// Persisted user configuration stored in `~/.inolink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial port (e.g. `/dev/ttyACM0`, `COM3`), or `sim` for the built-in
    /// simulated board.
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Sampling period as a time quantity (`"1 s"`, `"250 ms"`); a bare
    /// number is milliseconds.
    #[serde(default = "default_interval")]
    pub interval: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pause after opening a real port while the board reboots.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Feature sampled by `/start`.
    #[serde(default = "default_feature")]
    pub feature: String,

    /// Capacity of the shell's reading queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Unit the chart and `/read` display temperatures in.
    #[serde(default = "default_chart_units")]
    pub chart_units: String,
}

fn default_port() -> String {
    SIM_PORT.to_string()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_interval() -> String {
    "1 s".to_string()
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_retries() -> u32 {
    1
}
fn default_settle_ms() -> u64 {
    2000
}
fn default_feature() -> String {
    "temperature".to_string()
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_chart_units() -> String {
    "degC".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            interval: default_interval(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            settle_ms: default_settle_ms(),
            feature: default_feature(),
            queue_capacity: default_queue_capacity(),
            chart_units: default_chart_units(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Result<PollInterval, InoError> {
        self.interval.parse()
    }

    pub fn chart_unit(&self) -> Result<Unit, InoError> {
        let unit: Unit = self
            .chart_units
            .parse()
            .map_err(|e| InoError::Config(format!("chart_units: {e}")))?;
        if unit.dimension() != Dimension::Temperature {
            return Err(InoError::Config(format!(
                "chart_units must be a temperature unit, got '{}'",
                self.chart_units
            )));
        }
        Ok(unit)
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            settle: Duration::from_millis(self.settle_ms),
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.port == SIM_PORT
    }

    /// Reject values that would only fail later, mid-session.
    pub fn validate(&self) -> Result<(), InoError> {
        self.poll_interval()?;
        self.chart_unit()?;
        if self.timeout_ms == 0 {
            return Err(InoError::Config("timeout_ms must be positive".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(InoError::Config("baud_rate must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(InoError::Config("queue_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Return the path to `~/.inolink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".inolink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, InoError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, InoError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| InoError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| InoError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `INOLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `INOLINK_PORT` | `port` |
/// | `INOLINK_BAUD_RATE` | `baud_rate` |
/// | `INOLINK_INTERVAL` | `interval` |
/// | `INOLINK_TIMEOUT_MS` | `timeout_ms` |
/// | `INOLINK_FEATURE` | `feature` |
/// | `INOLINK_CHART_UNITS` | `chart_units` |
///
/// Numeric overrides that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("INOLINK_PORT") {
        cfg.port = v;
    }
    if let Ok(v) = std::env::var("INOLINK_BAUD_RATE")
        && let Ok(baud) = v.parse::<u32>()
    {
        cfg.baud_rate = baud;
    }
    if let Ok(v) = std::env::var("INOLINK_INTERVAL") {
        cfg.interval = v;
    }
    if let Ok(v) = std::env::var("INOLINK_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("INOLINK_FEATURE") {
        cfg.feature = v;
    }
    if let Ok(v) = std::env::var("INOLINK_CHART_UNITS") {
        cfg.chart_units = v;
    }
}

/// Save the config to disk, creating `~/.inolink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), InoError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), InoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| InoError::Config(format!("failed to create config directory: {e}")))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                InoError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| InoError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| InoError::Config(format!("failed to write {}: {e}", path.display()));
    // Owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("default config must validate");
        assert!(cfg.is_simulated());
        assert_eq!(cfg.poll_interval().unwrap().as_duration(), Duration::from_secs(1));
        assert_eq!(cfg.chart_unit().unwrap(), Unit::DegC);
        assert_eq!(cfg.link_settings(), LinkSettings::default());
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn interval_must_be_a_time() {
        let cfg = Config {
            interval: "5 degC".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(InoError::Config(_))));
    }

    #[test]
    fn chart_units_must_be_a_temperature() {
        let cfg = Config {
            chart_units: "ms".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.chart_unit(), Err(InoError::Config(_))));

        let cfg = Config {
            chart_units: "degF".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.chart_unit().unwrap(), Unit::DegF);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            port: "/dev/ttyACM0".to_string(),
            interval: "250 ms".to_string(),
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"COM3\"\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.port, "COM3");
        assert_eq!(loaded.baud_rate, 9600);
        assert_eq!(loaded.interval, "1 s");
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn unparseable_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "baud_rate = \"fast\"\n").expect("write");
        assert!(matches!(load_from(&path), Err(InoError::Config(_))));
    }

    #[test]
    fn config_path_points_to_inolink_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".inolink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn apply_env_overrides_changes_port() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("INOLINK_PORT", "/dev/ttyUSB1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.port, "/dev/ttyUSB1");
        unsafe { std::env::remove_var("INOLINK_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_baud_rate() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("INOLINK_BAUD_RATE", "115200") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.baud_rate, 115200);
        unsafe { std::env::remove_var("INOLINK_BAUD_RATE") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_timeout() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("INOLINK_TIMEOUT_MS", "soon") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.timeout_ms, 1000);
        unsafe { std::env::remove_var("INOLINK_TIMEOUT_MS") };
    }
}
