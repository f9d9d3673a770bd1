//! Configuration loading with Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/instruments.toml`)
//! 2. environment variables prefixed with `LABINST_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! LABINST_APPLICATION__LOG_LEVEL=debug
//! LABINST_TIMEOUTS__REPLY_MS=10000
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "cryostat rack"
//! log_level = "info"
//!
//! [[instruments]]
//! id = "magnet"
//! driver = "cryomagnetics_4g"
//! transport = { type = "serial", port = "/dev/ttyUSB0" }
//!
//! [instruments.config.cryomagnetics]
//! axes = ["Z", "Y"]
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::{FlowControl, Parity, StopBits};
use crate::registry::DriverKind;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/instruments.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "LABINST_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// The configuration was read but is inconsistent.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Default timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Timeouts applied when an instrument does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Connection setup timeout in milliseconds
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Reply timeout in milliseconds
    #[serde(default = "default_reply_ms")]
    pub reply_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            reply_ms: default_reply_ms(),
        }
    }
}

impl TimeoutSettings {
    /// Connection setup timeout.
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Reply timeout.
    pub fn reply(&self) -> Duration {
        Duration::from_millis(self.reply_ms)
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Which driver to use
    pub driver: DriverKind,
    /// Whether this instrument is opened by `open_all`
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How to reach the instrument
    pub transport: TransportConfig,
    /// Overrides the driver's read terminator
    #[serde(default)]
    pub read_terminator: Option<String>,
    /// Overrides the driver's write terminator
    #[serde(default)]
    pub write_terminator: Option<String>,
    /// Overrides `timeouts.reply_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Driver-specific settings
    #[serde(default)]
    pub config: DriverSpecificConfig,
}

impl InstrumentDefinition {
    /// Reply timeout for this instrument.
    pub fn reply_timeout(&self, defaults: &TimeoutSettings) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| defaults.reply())
    }
}

/// Transport selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Raw TCP socket
    Tcp {
        /// Host name or address
        host: String,
        /// TCP port (5025 for most SCPI instruments)
        port: u16,
    },
    /// Serial port. Unset line settings fall back to the driver's defaults.
    Serial {
        /// Device path (e.g. "/dev/ttyUSB0", "COM3")
        port: String,
        /// Baud rate
        #[serde(default)]
        baud_rate: Option<u32>,
        /// Data bits (5-8)
        #[serde(default)]
        data_bits: Option<u8>,
        /// Parity
        #[serde(default)]
        parity: Option<Parity>,
        /// Stop bits
        #[serde(default)]
        stop_bits: Option<StopBits>,
        /// Flow control
        #[serde(default)]
        flow_control: Option<FlowControl>,
    },
    /// VISA resource
    Visa {
        /// Resource string (e.g. "GPIB0::5::INSTR")
        resource: String,
    },
    /// Scripted replies, for dry runs
    Mock {
        /// Command → reply
        #[serde(default)]
        replies: BTreeMap<String, String>,
    },
}

/// Driver-specific configuration blocks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverSpecificConfig {
    /// Cryomagnetics 4G magnet supply
    #[serde(default)]
    pub cryomagnetics: Option<CryomagneticsConfig>,
    /// SP927 DAC
    #[serde(default)]
    pub sp927: Option<Sp927Config>,
}

/// Cryomagnetics 4G configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryomagneticsConfig {
    /// Axis names; axis `i` is channel `i + 1`
    #[serde(default = "default_axes")]
    pub axes: Vec<String>,
    /// Send `*RST` after connecting
    #[serde(default)]
    pub reset: bool,
    /// A sweep is done when the field is within this many tesla of the target
    #[serde(default = "default_field_margin")]
    pub field_margin_t: f64,
    /// Delay between field readbacks while sweeping
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Give up waiting for a sweep after this long
    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_secs: u64,
}

impl Default for CryomagneticsConfig {
    fn default() -> Self {
        Self {
            axes: default_axes(),
            reset: false,
            field_margin_t: default_field_margin(),
            poll_interval_ms: default_poll_interval(),
            sweep_timeout_secs: default_sweep_timeout(),
        }
    }
}

/// SP927 DAC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sp927Config {
    /// Lowest accepted voltage (inclusive)
    #[serde(default = "default_min_volt")]
    pub min_volt: f64,
    /// Highest accepted voltage (exclusive)
    #[serde(default = "default_max_volt")]
    pub max_volt: f64,
}

impl Default for Sp927Config {
    fn default() -> Self {
        Self {
            min_volt: default_min_volt(),
            max_volt: default_max_volt(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "lab-instruments".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_ms() -> u64 {
    5000
}

fn default_reply_ms() -> u64 {
    5000
}

fn default_enabled() -> bool {
    true
}

fn default_axes() -> Vec<String> {
    vec!["Z".to_string(), "Y".to_string()]
}

fn default_field_margin() -> f64 {
    0.001
}

fn default_poll_interval() -> u64 {
    50
}

fn default_sweep_timeout() -> u64 {
    600
}

fn default_min_volt() -> f64 {
    -10.0
}

fn default_max_volt() -> f64 {
    10.0
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file, apply `LABINST_` overrides, and validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load from TOML text, apply `LABINST_` overrides, and validate.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Timeouts are positive
    /// - Instrument IDs are non-empty and unique
    /// - Transport fields are present
    /// - Driver-specific blocks are consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.timeouts.connect_ms == 0 || self.timeouts.reply_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Timeouts must be greater than zero".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Instrument ID must not be empty".to_string(),
                ));
            }
            if !ids.insert(instrument.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            validate_instrument(instrument)?;
        }

        Ok(())
    }

    /// Instruments with `enabled = true`, in file order.
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments.iter().filter(|i| i.enabled).collect()
    }

    /// Look up an instrument definition by id.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments.iter().find(|i| i.id == id)
    }
}

fn validate_instrument(instrument: &InstrumentDefinition) -> Result<(), ConfigError> {
    let invalid = |msg: String| ConfigError::ValidationError(format!("Instrument '{}': {}", instrument.id, msg));

    match &instrument.transport {
        TransportConfig::Tcp { host, port } => {
            if host.trim().is_empty() {
                return Err(invalid("tcp transport requires a host".to_string()));
            }
            if *port == 0 {
                return Err(invalid("tcp port must be non-zero".to_string()));
            }
        }
        TransportConfig::Serial {
            port,
            baud_rate,
            data_bits,
            ..
        } => {
            if port.trim().is_empty() {
                return Err(invalid("serial transport requires a port".to_string()));
            }
            if *baud_rate == Some(0) {
                return Err(invalid("baud_rate must be non-zero".to_string()));
            }
            if let Some(bits) = data_bits {
                if !(5..=8).contains(bits) {
                    return Err(invalid(format!("data_bits {} must be 5-8", bits)));
                }
            }
        }
        TransportConfig::Visa { resource } => {
            if resource.trim().is_empty() {
                return Err(invalid("visa transport requires a resource".to_string()));
            }
        }
        TransportConfig::Mock { .. } => {}
    }

    if instrument.timeout_ms == Some(0) {
        return Err(invalid("timeout_ms must be greater than zero".to_string()));
    }
    if instrument.read_terminator.as_deref() == Some("") {
        return Err(invalid("read_terminator must not be empty".to_string()));
    }

    if let Some(magnet) = &instrument.config.cryomagnetics {
        if magnet.axes.is_empty() {
            return Err(invalid("cryomagnetics.axes must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for axis in &magnet.axes {
            if axis.trim().is_empty() || !seen.insert(axis.to_ascii_uppercase()) {
                return Err(invalid(format!("cryomagnetics axis '{}' is empty or repeated", axis)));
            }
        }
        if !(magnet.field_margin_t > 0.0) {
            return Err(invalid("cryomagnetics.field_margin_t must be positive".to_string()));
        }
        if magnet.poll_interval_ms == 0 || magnet.sweep_timeout_secs == 0 {
            return Err(invalid(
                "cryomagnetics poll interval and sweep timeout must be non-zero".to_string(),
            ));
        }
    }

    if let Some(dac) = &instrument.config.sp927 {
        if !(dac.min_volt < dac.max_volt) {
            return Err(invalid(format!(
                "sp927.min_volt ({}) must be below max_volt ({})",
                dac.min_volt, dac.max_volt
            )));
        }
    }

    Ok(())
}
