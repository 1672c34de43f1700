//! Configuration management for radarcam.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::encoder::default_ffmpeg_args;
use crate::error::{Error, Result};
use crate::fusion::FusionConfig;
use crate::overlay::{OverlayOptions, SpeedUnit};
use crate::radar::ProtocolVariant;
use crate::reader::ReconnectPolicy;
use crate::session::SessionConfig;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "radarcam";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "telemetry.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "RADARCAM_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `RADARCAM_`, `__` between levels,
///    e.g. `RADARCAM_GPS__PORT`)
/// 2. TOML config file at `~/.config/radarcam/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Radar detector.
    pub radar: RadarConfig,
    /// GPS receiver.
    pub gps: GpsConfig,
    /// Reconnect behavior for both devices.
    pub reconnect: ReconnectConfig,
    /// Sensor fusion.
    pub fusion: FusionSection,
    /// Recording sessions.
    pub recording: RecordingConfig,
    /// Encoder process.
    pub encoder: EncoderConfig,
    /// Overlay text.
    pub overlay: OverlayConfig,
    /// Telemetry database.
    pub storage: StorageConfig,
}

/// Radar detector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Read the radar detector.
    pub enabled: bool,
    /// Serial port.
    pub port: String,
    /// Baud rate.
    pub baud: u32,
    /// Protocol generation (`checksummed` or `legacy`).
    pub variant: ProtocolVariant,
}

/// GPS receiver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Read the GPS receiver.
    pub enabled: bool,
    /// Serial port.
    pub port: String,
    /// Baud rate.
    pub baud: u32,
}

/// Reconnect configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubling delay in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive failures before giving up. 0 retries forever.
    pub max_attempts: u32,
}

/// Sensor fusion configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSection {
    /// Maximum number of radar alerts kept.
    pub radar_capacity: usize,
    /// Radar freshness threshold in milliseconds.
    pub radar_stale_ms: u64,
    /// GPS freshness threshold in milliseconds.
    pub gps_stale_ms: u64,
}

/// Recording configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory for segment files.
    /// Defaults to `~/.local/share/radarcam/recordings`
    pub output_dir: Option<PathBuf>,
    /// Segment length in seconds.
    pub segment_seconds: u64,
    /// Overlay tick interval in milliseconds.
    pub tick_ms: u64,
    /// Time the encoder gets to finish a file before it is killed.
    pub stop_grace_ms: u64,
    /// Segment file extension.
    pub extension: String,
}

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Program to run.
    pub program: String,
    /// Argument template; `{output}`, `{overlay}` and `{duration}` are
    /// substituted per segment.
    pub args: Vec<String>,
}

/// Overlay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Overlay text file read by the encoder.
    /// Defaults to `~/.local/share/radarcam/overlay.txt`
    pub path: Option<PathBuf>,
    /// Show position, satellites and speed.
    pub show_gps: bool,
    /// Show the featured radar alert.
    pub show_radar: bool,
    /// Speed unit (`mph` or `kph`).
    pub speed_unit: SpeedUnit,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record sessions, segments and per-tick samples.
    pub telemetry_log: bool,
    /// Path to the database file.
    /// Defaults to `~/.local/share/radarcam/telemetry.db`
    pub database_path: Option<PathBuf>,
    /// Maximum age of logged sessions in days.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_string(),
            baud: 19_200,
            variant: ProtocolVariant::Checksummed,
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/serial0".to_string(),
            baud: 9_600,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl Default for FusionSection {
    fn default() -> Self {
        let fusion = FusionConfig::default();
        Self {
            radar_capacity: fusion.radar_capacity,
            radar_stale_ms: duration_ms(fusion.radar_stale),
            gps_stale_ms: duration_ms(fusion.gps_stale),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            segment_seconds: 180,
            tick_ms: 1_000,
            stop_grace_ms: 10_000,
            extension: "mp4".to_string(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: default_ffmpeg_args(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        let options = OverlayOptions::default();
        Self {
            path: None,
            show_gps: options.show_gps,
            show_radar: options.show_radar,
            speed_unit: options.speed_unit,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            telemetry_log: true,
            database_path: None,
            max_age_days: 30,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `RADARCAM_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.radar.enabled {
            if self.radar.port.trim().is_empty() {
                return Err(Error::config("radar.port is required when radar is enabled"));
            }
            if self.radar.baud == 0 {
                return Err(Error::config("radar.baud must be greater than 0"));
            }
        }

        if self.gps.enabled {
            if self.gps.port.trim().is_empty() {
                return Err(Error::config("gps.port is required when gps is enabled"));
            }
            if self.gps.baud == 0 {
                return Err(Error::config("gps.baud must be greater than 0"));
            }
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err(Error::config(
                "reconnect.initial_delay_ms must be greater than 0",
            ));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(Error::config(format!(
                "reconnect.initial_delay_ms ({}) cannot be greater than reconnect.max_delay_ms ({})",
                self.reconnect.initial_delay_ms, self.reconnect.max_delay_ms
            )));
        }

        if self.fusion.radar_capacity == 0 {
            return Err(Error::config("fusion.radar_capacity must be greater than 0"));
        }
        if self.fusion.radar_stale_ms == 0 || self.fusion.gps_stale_ms == 0 {
            return Err(Error::config(
                "fusion.radar_stale_ms and fusion.gps_stale_ms must be greater than 0",
            ));
        }

        if self.recording.segment_seconds == 0 {
            return Err(Error::config(
                "recording.segment_seconds must be greater than 0",
            ));
        }
        if self.recording.tick_ms == 0 {
            return Err(Error::config("recording.tick_ms must be greater than 0"));
        }
        if self.recording.tick_ms > self.recording.segment_seconds.saturating_mul(1_000) {
            return Err(Error::config(
                "recording.tick_ms cannot be longer than a segment",
            ));
        }
        if self.recording.extension.is_empty() || self.recording.extension.contains('/') {
            return Err(Error::config(format!(
                "invalid recording.extension: {:?}",
                self.recording.extension
            )));
        }

        if self.encoder.program.trim().is_empty() {
            return Err(Error::config("encoder.program must not be empty"));
        }
        if !self.encoder.args.iter().any(|arg| arg.contains("{output}")) {
            return Err(Error::config(
                "encoder.args must contain the {output} placeholder",
            ));
        }

        Ok(())
    }

    /// Check that every enabled device path exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceOpen`] for the first missing device.
    pub fn check_devices(&self) -> Result<()> {
        let devices = [
            (self.radar.enabled, &self.radar.port),
            (self.gps.enabled, &self.gps.port),
        ];
        for (enabled, port) in devices {
            if !enabled {
                continue;
            }
            if let Err(source) = std::fs::metadata(port) {
                return Err(Error::DeviceOpen {
                    device: port.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the recordings directory, resolving defaults if not set.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.recording
            .output_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("recordings"))
    }

    /// Get the overlay file path, resolving defaults if not set.
    #[must_use]
    pub fn overlay_path(&self) -> PathBuf {
        self.overlay
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("overlay.txt"))
    }

    /// Get the max age of logged sessions.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Reconnect policy for the device readers.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Fusion bus settings.
    #[must_use]
    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            radar_capacity: self.fusion.radar_capacity,
            radar_stale: Duration::from_millis(self.fusion.radar_stale_ms),
            gps_stale: Duration::from_millis(self.fusion.gps_stale_ms),
        }
    }

    /// Session settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            output_dir: self.output_dir(),
            segment_duration: Duration::from_secs(self.recording.segment_seconds),
            tick_interval: Duration::from_millis(self.recording.tick_ms),
            overlay_path: self.overlay_path(),
            stop_grace: Duration::from_millis(self.recording.stop_grace_ms),
            extension: self.recording.extension.clone(),
        }
    }

    /// Overlay rendering options.
    #[must_use]
    pub fn overlay_options(&self) -> OverlayOptions {
        OverlayOptions {
            speed_unit: self.overlay.speed_unit,
            show_gps: self.overlay.show_gps,
            show_radar: self.overlay.show_radar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.radar.enabled);
        assert_eq!(config.radar.baud, 19_200);
        assert_eq!(config.radar.variant, ProtocolVariant::Checksummed);
        assert_eq!(config.gps.port, "/dev/serial0");
        assert_eq!(config.gps.baud, 9_600);
        assert_eq!(config.fusion.radar_capacity, 5);
        assert_eq!(config.fusion.radar_stale_ms, 2_000);
        assert_eq!(config.fusion.gps_stale_ms, 3_000);
        assert_eq!(config.recording.segment_seconds, 180);
        assert_eq!(config.recording.tick_ms, 1_000);
        assert_eq!(config.overlay.speed_unit, SpeedUnit::Mph);
        assert!(config.storage.telemetry_log);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_port() {
        let mut config = Config::default();
        config.gps.port = String::new();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert!(err.to_string().contains("gps.port"));

        config.gps.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_values() {
        let cases: [(fn(&mut Config), &str); 11] = [
            (|c: &mut Config| c.radar.baud = 0, "radar.baud"),
            (|c: &mut Config| c.reconnect.initial_delay_ms = 0, "initial_delay_ms"),
            (|c: &mut Config| c.reconnect.max_delay_ms = 1, "max_delay_ms"),
            (|c: &mut Config| c.fusion.radar_capacity = 0, "radar_capacity"),
            (|c: &mut Config| c.fusion.gps_stale_ms = 0, "gps_stale_ms"),
            (|c: &mut Config| c.recording.segment_seconds = 0, "segment_seconds"),
            (|c: &mut Config| c.recording.tick_ms = 0, "tick_ms"),
            (|c: &mut Config| c.recording.tick_ms = 181_000, "tick_ms"),
            (|c: &mut Config| c.recording.extension = String::new(), "extension"),
            (|c: &mut Config| c.encoder.program = " ".to_string(), "encoder.program"),
            (|c: &mut Config| c.encoder.args = vec!["-y".to_string()], "{output}"),
        ];
        for (mutate, needle) in cases {
            let mut config = Config::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(needle), "{err} should mention {needle}");
        }
    }

    #[test]
    fn test_check_devices() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("ttyFAKE");
        std::fs::write(&present, b"").unwrap();

        let mut config = Config::default();
        config.radar.port = present.display().to_string();
        config.gps.port = dir.path().join("missing").display().to_string();

        let err = config.check_devices().unwrap_err();
        assert!(matches!(err, Error::DeviceOpen { ref device, .. } if device.ends_with("missing")));

        config.gps.enabled = false;
        assert!(config.check_devices().is_ok());
    }

    #[test]
    fn test_resolved_paths() {
        let config = Config::default();
        assert!(config.database_path().ends_with("radarcam/telemetry.db"));
        assert!(config.output_dir().ends_with("radarcam/recordings"));
        assert!(config.overlay_path().ends_with("radarcam/overlay.txt"));

        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.recording.output_dir = Some(PathBuf::from("/rec"));
        config.overlay.show_radar = false;

        let session = config.session_config();
        assert_eq!(session.output_dir, PathBuf::from("/rec"));
        assert_eq!(session.segment_duration, Duration::from_secs(180));
        assert_eq!(session.stop_grace, Duration::from_secs(10));

        assert_eq!(config.fusion_config(), FusionConfig::default());
        assert_eq!(config.reconnect_policy().max_attempts, 10);
        assert!(!config.overlay_options().show_radar);
        assert_eq!(
            config.max_age(),
            Some(Duration::from_secs(30 * 24 * 60 * 60))
        );
        config.storage.max_age_days = 0;
        assert!(config.max_age().is_none());
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("radarcam"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "radarcam.toml",
                r#"
                [radar]
                port = "/dev/ttyACM0"
                variant = "legacy"

                [recording]
                segment_seconds = 60

                [overlay]
                speed_unit = "kph"
                "#,
            )?;
            jail.set_env("RADARCAM_GPS__BAUD", "38400");

            let config = Config::load_from(Some(PathBuf::from("radarcam.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.radar.port, "/dev/ttyACM0");
            assert_eq!(config.radar.variant, ProtocolVariant::Legacy);
            assert_eq!(config.recording.segment_seconds, 60);
            assert_eq!(config.overlay.speed_unit, SpeedUnit::Kph);
            assert_eq!(config.gps.baud, 38_400);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_variant_is_load_error() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("radarcam.toml", "[radar]\nvariant = \"v9\"\n")?;
            let err = Config::load_from(Some(PathBuf::from("radarcam.toml"))).unwrap_err();
            assert!(matches!(err, Error::ConfigLoad(_)));
            Ok(())
        });
    }

    #[test]
    fn test_config_roundtrips_through_toml_shape() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"segment_seconds\":180"));
        assert!(json.contains("\"variant\":\"checksummed\""));
    }
}
