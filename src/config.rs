//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! The configuration is loaded once at startup into an immutable [`Config`]
//! and handed to each component by reference (usually as `Arc<Config>`).

use serde::de::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GroundError, Result};

/// Placeholder substituted with the team id in the structured log filename
pub const TEAM_ID_PLACEHOLDER: &str = "${TEAM_ID}";

/// Accepted range for generator and playback cadences (seconds)
pub const INTERVAL_RANGE_S: RangeInclusive<f64> = 0.01..=3600.0;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Mission identity and local folders
#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationConfig {
    #[serde(default = "default_team_id")]
    pub team_id: String,

    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,

    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

/// Serial link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_bauds_default")]
    pub bauds_default: String,

    /// Operator-facing label to numeric baud rate
    #[serde(default = "default_bauds")]
    pub bauds: BTreeMap<String, u32>,

    #[serde(default = "default_time_out_s")]
    pub time_out_s: u64,

    #[serde(default)]
    pub filter_character: String,

    #[serde(default = "default_alarm")]
    pub alarm: bool,

    /// Upper bound of the reconnect backoff
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// 0 retries until an explicit disconnect
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

/// Telemetry logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub csv: CsvConfig,
}

/// Structured CSV log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CsvConfig {
    #[serde(default = "default_csv_enable")]
    pub enable: bool,

    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,

    #[serde(default = "default_include_header")]
    pub include_header: bool,
}

/// Dummy generator and pressure playback configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_dummy_interval_s")]
    pub dummy_interval_s: f64,

    #[serde(default = "default_csv_profile_path")]
    pub csv_profile_path: String,

    #[serde(default = "default_csv_column")]
    pub csv_column: String,

    #[serde(default = "default_tx_interval_s")]
    pub tx_interval_s: f64,
}

/// Fan-out configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Capacity of the bounded queue feeding off-thread consumers
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_team_id() -> String { "1043".to_string() }
fn default_logs_folder() -> String { "./saves".to_string() }
fn default_command_prefix() -> String { "/".to_string() }

fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_bauds_default() -> String { "115200".to_string() }
fn default_bauds() -> BTreeMap<String, u32> {
    [("9600", 9600), ("57600", 57600), ("115200", 115200)]
        .into_iter()
        .map(|(label, rate)| (label.to_string(), rate))
        .collect()
}
fn default_time_out_s() -> u64 { 2 }
fn default_alarm() -> bool { true }
fn default_reconnect_interval_ms() -> u64 { 1000 }

fn default_csv_enable() -> bool { true }
fn default_filename_pattern() -> String { "Flight_${TEAM_ID}.csv".to_string() }
fn default_include_header() -> bool { true }

fn default_dummy_interval_s() -> f64 { 1.0 }
fn default_csv_profile_path() -> String { "./sim/pressure_profile.csv".to_string() }
fn default_csv_column() -> String { "pressure_pa".to_string() }
fn default_tx_interval_s() -> f64 { 1.0 }

fn default_channel_capacity() -> usize { 64 }

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            team_id: default_team_id(),
            logs_folder: default_logs_folder(),
            command_prefix: default_command_prefix(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bauds_default: default_bauds_default(),
            bauds: default_bauds(),
            time_out_s: default_time_out_s(),
            filter_character: String::new(),
            alarm: default_alarm(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            enable: default_csv_enable(),
            filename_pattern: default_filename_pattern(),
            include_header: default_include_header(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dummy_interval_s: default_dummy_interval_s(),
            csv_profile_path: default_csv_profile_path(),
            csv_column: default_csv_column(),
            tx_interval_s: default_tx_interval_s(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

pub(crate) fn invalid(msg: impl std::fmt::Display) -> GroundError {
    GroundError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ddl_ground::config::Config;
    ///
    /// let config = Config::load("config/ground.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.application.team_id.trim().is_empty() {
            return Err(invalid("team_id cannot be empty"));
        }

        if self.application.logs_folder.trim().is_empty() {
            return Err(invalid("logs_folder cannot be empty"));
        }

        if self.application.command_prefix.is_empty() {
            return Err(invalid("command_prefix cannot be empty"));
        }

        if self.connection.bauds.is_empty() {
            return Err(invalid("bauds must contain at least one label"));
        }

        if !self.connection.bauds.contains_key(&self.connection.bauds_default) {
            return Err(invalid(format!(
                "bauds_default '{}' is not a label in bauds",
                self.connection.bauds_default
            )));
        }

        if self.connection.bauds.values().any(|&rate| rate == 0) {
            return Err(invalid("baud rates must be greater than 0"));
        }

        if self.connection.time_out_s == 0 || self.connection.time_out_s > 60 {
            return Err(invalid("time_out_s must be between 1 and 60"));
        }

        if self.connection.reconnect_interval_ms == 0 || self.connection.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.connection.filter_character.chars().count() > 1 {
            return Err(invalid("filter_character must be empty or a single character"));
        }

        if self.telemetry.csv.filename_pattern.trim().is_empty() {
            return Err(invalid("filename_pattern cannot be empty"));
        }

        for (name, value) in [
            ("dummy_interval_s", self.simulation.dummy_interval_s),
            ("tx_interval_s", self.simulation.tx_interval_s),
        ] {
            if !INTERVAL_RANGE_S.contains(&value) {
                return Err(invalid(format!(
                    "{} must be between {} and {}",
                    name,
                    INTERVAL_RANGE_S.start(),
                    INTERVAL_RANGE_S.end()
                )));
            }
        }

        if self.dispatch.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be greater than 0"));
        }

        Ok(())
    }

    /// Resolve an operator baud label (e.g. "115200") to its numeric rate
    pub fn baud_for(&self, label: &str) -> Option<u32> {
        self.connection.bauds.get(label).copied()
    }

    /// Baud rate selected by `bauds_default`
    pub fn default_baud(&self) -> u32 {
        self.baud_for(&self.connection.bauds_default)
            .unwrap_or(115_200)
    }

    /// Read timeout applied to the serial link
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.time_out_s)
    }

    /// Optional single leading character stripped from every frame
    pub fn filter_character(&self) -> Option<char> {
        self.connection.filter_character.chars().next()
    }

    /// Path of the structured CSV log, with the team id substituted
    pub fn csv_path(&self) -> PathBuf {
        let filename = self
            .telemetry
            .csv
            .filename_pattern
            .replace(TEAM_ID_PLACEHOLDER, &self.application.team_id);
        Path::new(&self.application.logs_folder).join(filename)
    }

    /// Folder holding the raw-line archive
    pub fn black_box_dir(&self) -> PathBuf {
        Path::new(&self.application.logs_folder).join("BlackBox")
    }

    /// Default cadence of the dummy generator
    pub fn dummy_interval(&self) -> Duration {
        Duration::from_secs_f64(self.simulation.dummy_interval_s)
    }

    /// Cadence of the pressure playback uplink
    pub fn tx_interval(&self) -> Duration {
        Duration::from_secs_f64(self.simulation.tx_interval_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[application]
team_id = "2031"

[connection]
port = "/dev/ttyACM0"
bauds_default = "9600"
bauds = { "9600" = 9600 }
filter_character = "$"

[telemetry.csv]
filename_pattern = "Mission_${TEAM_ID}.csv"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.application.team_id, "2031");
        assert_eq!(config.default_baud(), 9600);
        assert_eq!(config.filter_character(), Some('$'));
        assert!(config.csv_path().ends_with("Mission_2031.csv"));
        // untouched sections keep their defaults
        assert_eq!(config.simulation.dummy_interval_s, 1.0);
        assert!(config.telemetry.csv.include_header);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = Config::from_toml(include_str!("../config/ground.toml")).unwrap();
        assert_eq!(config.default_baud(), 115200);
        assert_eq!(config.filter_character(), None);
        assert_eq!(config.simulation.csv_column, "pressure_pa");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.application.team_id, "1043");
        assert_eq!(config.csv_path(), Path::new("./saves").join("Flight_1043.csv"));
        assert_eq!(config.black_box_dir(), Path::new("./saves").join("BlackBox"));
    }

    #[test]
    fn test_empty_team_id() {
        let mut config = Config::default();
        config.application.team_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_logs_folder() {
        let mut config = Config::default();
        config.application.logs_folder = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bauds_default_not_in_map() {
        let mut config = Config::default();
        config.connection.bauds_default = "4800".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_bauds() {
        let mut config = Config::default();
        config.connection.bauds.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_time_out_zero() {
        let mut config = Config::default();
        config.connection.time_out_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_time_out_too_high() {
        let mut config = Config::default();
        config.connection.time_out_s = 61;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_zero() {
        let mut config = Config::default();
        config.connection.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_character_too_long() {
        let mut config = Config::default();
        config.connection.filter_character = "$$".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dummy_interval_invalid() {
        let mut config = Config::default();
        config.simulation.dummy_interval_s = 0.0;
        assert!(config.validate().is_err());
        config.simulation.dummy_interval_s = f64::NAN;
        assert!(config.validate().is_err());
        config.simulation.dummy_interval_s = 1e-9;
        assert!(config.validate().is_err());
        config.simulation.dummy_interval_s = 1e20;
        assert!(config.validate().is_err());
        config.simulation.dummy_interval_s = 3600.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_capacity_zero() {
        let mut config = Config::default();
        config.dispatch.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_baud_lookup() {
        let config = Config::default();
        assert_eq!(config.baud_for("57600"), Some(57600));
        assert_eq!(config.baud_for("1"), None);
        assert_eq!(config.default_baud(), 115200);
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_team_id(), "1043");
        assert_eq!(default_logs_folder(), "./saves");
        assert_eq!(default_command_prefix(), "/");
        assert_eq!(default_time_out_s(), 2);
        assert_eq!(default_filename_pattern(), "Flight_${TEAM_ID}.csv");
        assert_eq!(default_tx_interval_s(), 1.0);
        assert_eq!(default_channel_capacity(), 64);
    }
}
