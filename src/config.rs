use crate::error::{MonitorError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(&key).is_err() {
            // SAFETY: called from main before the tokio runtime spawns any threads
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

/// Application configuration.
///
/// Sections mirror the JSON document on disk. Missing sections or keys fall
/// back to their defaults, so a config file only needs the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorLinkConfig,
    pub storage: StorageConfig,
    pub calibration: CalibrationConfig,
    pub acquisition: AcquisitionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorLinkConfig {
    /// Whether the NFC link (reader mode) is enabled.
    pub link_mode: bool,
    pub presence_check_interval_ms: u64,
    pub link_timeout_ms: u64,
    /// Start reading as soon as a tag enters the field.
    pub auto_detect: bool,
}

impl Default for SensorLinkConfig {
    fn default() -> Self {
        Self {
            link_mode: true,
            presence_check_interval_ms: 250,
            link_timeout_ms: 3000,
            auto_detect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the daily partition files and exports.
    pub path: PathBuf,
    /// In-memory buffer capacity (readings).
    pub buffer_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_dir(),
            buffer_capacity: crate::buffer::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub temperature_offset: f64,
    pub ph_calibration_point: f64,
    pub glucose_calibration_point: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            temperature_offset: 0.0,
            ph_calibration_point: 7.0,
            glucose_calibration_point: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Seconds between acquisition ticks.
    pub interval_secs: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

/// Default data directory: `<local data dir>/sensor-monitor/sensor_data`.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("sensor-monitor").join("sensor_data"))
        .unwrap_or_else(|| PathBuf::from("./sensor_data"))
}

/// Default config file: `<config dir>/sensor-monitor/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("sensor-monitor"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => {
                let config = serde_json::from_slice::<Config>(&bytes)?;
                info!("Loaded configuration from {:?}", path);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration file at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Defaults overlaid with process environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay process environment variables onto this configuration.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`. Unparseable values are logged and skipped.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring unparseable {}={:?}", key, raw);
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "SENSOR_LINK_MODE") {
            self.sensor.link_mode = v;
        }
        if let Some(v) = parsed(&lookup, "SENSOR_PRESENCE_CHECK_MS") {
            self.sensor.presence_check_interval_ms = v;
        }
        if let Some(v) = parsed(&lookup, "SENSOR_LINK_TIMEOUT_MS") {
            self.sensor.link_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "SENSOR_AUTO_DETECT") {
            self.sensor.auto_detect = v;
        }
        if let Some(v) = parsed(&lookup, "SENSOR_TEMPERATURE_OFFSET") {
            self.calibration.temperature_offset = v;
        }
        if let Some(v) = parsed(&lookup, "SENSOR_PH_CALIBRATION") {
            self.calibration.ph_calibration_point = v;
        }
        if let Some(v) = parsed(&lookup, "SENSOR_GLUCOSE_CALIBRATION") {
            self.calibration.glucose_calibration_point = v;
        }
        if let Some(dir) = lookup("STORAGE_DIR") {
            self.storage.path = PathBuf::from(dir);
        }
        if let Some(v) = parsed(&lookup, "BUFFER_CAPACITY") {
            self.storage.buffer_capacity = v;
        }
        if let Some(v) = parsed(&lookup, "ACQUISITION_INTERVAL_SECS") {
            self.acquisition.interval_secs = v;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.interval_secs == 0 {
            return Err(MonitorError::InvalidConfig {
                key: "acquisition.interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        SessionConfigPatch::from(self.session_config()).validate()
    }

    /// The flattened subset the sensor session works with.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            link_mode: self.sensor.link_mode,
            presence_check_interval_ms: self.sensor.presence_check_interval_ms,
            link_timeout_ms: self.sensor.link_timeout_ms,
            temperature_offset: self.calibration.temperature_offset,
            ph_calibration_point: self.calibration.ph_calibration_point,
            glucose_calibration_point: self.calibration.glucose_calibration_point,
            auto_detect: self.sensor.auto_detect,
        }
    }
}

/// Runtime options owned by the sensor session and passed to the bridge.
///
/// The timeout values are opaque to the session; bridges use them to bound
/// their own blocking calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub link_mode: bool,
    pub presence_check_interval_ms: u64,
    pub link_timeout_ms: u64,
    pub temperature_offset: f64,
    pub ph_calibration_point: f64,
    pub glucose_calibration_point: f64,
    pub auto_detect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}

impl SessionConfig {
    /// Merge a partial update. Keys absent from `patch` keep their value.
    ///
    /// The patch is validated first; nothing is applied if any value is rejected.
    pub fn merge(&mut self, patch: &SessionConfigPatch) -> Result<()> {
        patch.validate()?;

        if let Some(v) = patch.link_mode {
            self.link_mode = v;
        }
        if let Some(v) = patch.presence_check_interval_ms {
            self.presence_check_interval_ms = v;
        }
        if let Some(v) = patch.link_timeout_ms {
            self.link_timeout_ms = v;
        }
        if let Some(v) = patch.temperature_offset {
            self.temperature_offset = v;
        }
        if let Some(v) = patch.ph_calibration_point {
            self.ph_calibration_point = v;
        }
        if let Some(v) = patch.glucose_calibration_point {
            self.glucose_calibration_point = v;
        }
        if let Some(v) = patch.auto_detect {
            self.auto_detect = v;
        }
        Ok(())
    }
}

/// Partial [`SessionConfig`] update.
///
/// Deserializes from a key-value map such as
/// `{"temperature_offset": 0.4, "auto_detect": false}`; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_check_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph_calibration_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose_calibration_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_detect: Option<bool>,
}

impl From<SessionConfig> for SessionConfigPatch {
    fn from(config: SessionConfig) -> Self {
        Self {
            link_mode: Some(config.link_mode),
            presence_check_interval_ms: Some(config.presence_check_interval_ms),
            link_timeout_ms: Some(config.link_timeout_ms),
            temperature_offset: Some(config.temperature_offset),
            ph_calibration_point: Some(config.ph_calibration_point),
            glucose_calibration_point: Some(config.glucose_calibration_point),
            auto_detect: Some(config.auto_detect),
        }
    }
}

impl SessionConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether this patch touches anything the tag itself stores.
    pub fn touches_calibration(&self) -> bool {
        self.temperature_offset.is_some()
            || self.ph_calibration_point.is_some()
            || self.glucose_calibration_point.is_some()
    }

    fn validate(&self) -> Result<()> {
        let floats = [
            ("temperature_offset", self.temperature_offset),
            ("ph_calibration_point", self.ph_calibration_point),
            ("glucose_calibration_point", self.glucose_calibration_point),
        ];
        for (key, value) in floats {
            if let Some(v) = value
                && !v.is_finite()
            {
                return Err(MonitorError::InvalidConfig {
                    key: key.to_string(),
                    reason: format!("{} is not a finite number", v),
                });
            }
        }
        if let Some(ph) = self.ph_calibration_point
            && !(0.0..=14.0).contains(&ph)
        {
            return Err(MonitorError::InvalidConfig {
                key: "ph_calibration_point".to_string(),
                reason: format!("{} is outside 0-14", ph),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reader_defaults() {
        let session = Config::default().session_config();
        assert!(session.link_mode);
        assert_eq!(session.presence_check_interval_ms, 250);
        assert_eq!(session.link_timeout_ms, 3000);
        assert_eq!(session.temperature_offset, 0.0);
        assert_eq!(session.ph_calibration_point, 7.0);
        assert_eq!(session.glucose_calibration_point, 100.0);
        assert!(session.auto_detect);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let json = r#"{ "calibration": { "temperature_offset": 0.5 }, "acquisition": { "interval_secs": 10 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.calibration.temperature_offset, 0.5);
        assert_eq!(config.calibration.ph_calibration_point, 7.0);
        assert_eq!(config.acquisition.interval_secs, 10);
        assert_eq!(config.sensor, SensorLinkConfig::default());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.sensor.link_timeout_ms = 1200;
        config.storage.path = dir.path().join("data");

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(MonitorError::SerdeJsonError(_))
        ));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SENSOR_LINK_TIMEOUT_MS", "1500"),
            ("SENSOR_TEMPERATURE_OFFSET", "-0.3"),
            ("STORAGE_DIR", "/var/lib/sensor"),
            ("ACQUISITION_INTERVAL_SECS", "not-a-number"),
        ]);
        let config = Config::default().with_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.sensor.link_timeout_ms, 1500);
        assert_eq!(config.calibration.temperature_offset, -0.3);
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/sensor"));
        assert_eq!(config.acquisition.interval_secs, 5);
    }

    #[test]
    fn test_parse_dotenv() {
        let pairs = parse_dotenv("# comment\n\nSTORAGE_DIR = /data/my sensors\nSENSOR_LINK_MODE=\"false\"\nbogus\n");
        assert_eq!(
            pairs,
            vec![
                ("STORAGE_DIR".to_string(), "/data/my sensors".to_string()),
                ("SENSOR_LINK_MODE".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_merge_keeps_unspecified_keys() {
        let mut session = SessionConfig::default();
        let patch: SessionConfigPatch =
            serde_json::from_str(r#"{ "temperature_offset": 0.4, "auto_detect": false }"#).unwrap();

        session.merge(&patch).unwrap();
        assert_eq!(session.temperature_offset, 0.4);
        assert!(!session.auto_detect);
        assert_eq!(session.link_timeout_ms, 3000);
        assert!(patch.touches_calibration());
    }

    #[test]
    fn test_patch_rejects_unknown_keys() {
        let result = serde_json::from_str::<SessionConfigPatch>(r#"{ "nfc_mode": true }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_patch_applies_nothing() {
        let mut session = SessionConfig::default();
        let patch = SessionConfigPatch {
            link_timeout_ms: Some(10),
            ph_calibration_point: Some(15.0),
            ..Default::default()
        };

        assert!(matches!(
            session.merge(&patch),
            Err(MonitorError::InvalidConfig { .. })
        ));
        assert_eq!(session, SessionConfig::default());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.acquisition.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.calibration.ph_calibration_point = -1.0;
        assert!(config.validate().is_err());
    }
}
