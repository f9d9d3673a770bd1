//! Cryomagnetics 4G superconducting magnet power supply.
//!
//! One supply drives up to two magnet channels. Every per-axis command is
//! preceded by `CHAN n`, so the select and the command run under a driver-level
//! lock to keep another task from switching channels in between.
//!
//! The supply reports field in kilogauss (`IMAG?` → `12.3400kG`); `{axis}_field`
//! converts to tesla. Setting a field starts a sweep toward it and polls the
//! readback until it is within `field_margin_t` of the target.
//!
//! ## Configuration
//!
//! ```toml
//! [[instruments]]
//! id = "magnet"
//! driver = "cryomagnetics_4g"
//! transport = { type = "serial", port = "/dev/ttyUSB0" }
//!
//! [instruments.config.cryomagnetics]
//! axes = ["Z", "Y"]
//! field_margin_t = 0.001
//! sweep_timeout_secs = 600
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::SerialSettings;
use crate::config::CryomagneticsConfig;
use crate::core::{bool_arg, float_arg, parse_float, text_arg, Driver};
use crate::error::{DriverError, DriverResult};
use crate::instrument::{format, Connection, ConnectionSettings};
use crate::parameter::{FunctionInfo, ParamValue, ParameterInfo, Validator};

/// Line terminator for both directions.
pub const TERMINATOR: &str = "\n";

/// Sweep modes accepted by `SWEEP`.
pub const SWEEP_MODES: [&str; 6] = ["UP", "UP FAST", "DOWN", "DOWN FAST", "PAUSE", "ZERO"];

/// Tesla per kilogauss.
const KG_TO_T: f64 = 0.1;
/// Kilogauss per tesla.
const T_TO_KG: f64 = 10.0;

// Numeric part followed by a unit: "-1.2345kG", "50.000A".
#[allow(clippy::expect_used)]
static REPLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(-?\d*\.?\d*)([a-zA-Z]+)").expect("reply pattern is valid"));

/// Connection defaults for this instrument.
pub fn default_connection() -> ConnectionSettings {
    ConnectionSettings::with_terminator(TERMINATOR)
}

/// Serial line defaults: 9600 baud, 8N1, no flow control.
pub fn serial_settings() -> SerialSettings {
    SerialSettings::default()
}

/// Split a `{value}{unit}` reply.
pub fn parse_reading(command: &str, reply: &str) -> DriverResult<(f64, String)> {
    let caps = REPLY_RE
        .captures(reply)
        .ok_or_else(|| DriverError::parse(command, reply, "expected <number><unit>"))?;
    let value = caps[1]
        .parse::<f64>()
        .map_err(|e| DriverError::parse(command, reply, e))?;
    Ok((value, caps[2].to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisParam {
    Field,
    Sweep,
    LowLim,
    UpLim,
    Units,
    Rate0,
    Rate1,
    Heater,
}

impl AxisParam {
    const ALL: [AxisParam; 8] = [
        AxisParam::Field,
        AxisParam::Sweep,
        AxisParam::LowLim,
        AxisParam::UpLim,
        AxisParam::Units,
        AxisParam::Rate0,
        AxisParam::Rate1,
        AxisParam::Heater,
    ];

    fn suffix(self) -> &'static str {
        match self {
            AxisParam::Field => "field",
            AxisParam::Sweep => "sweep",
            AxisParam::LowLim => "lowlim",
            AxisParam::UpLim => "uplim",
            AxisParam::Units => "units",
            AxisParam::Rate0 => "rate0",
            AxisParam::Rate1 => "rate1",
            AxisParam::Heater => "heater",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.suffix() == suffix)
    }

    fn info(self, axis: &str) -> ParameterInfo {
        let info = ParameterInfo::new(format!("{}_{}", axis.to_ascii_lowercase(), self.suffix()));
        match self {
            AxisParam::Field => info
                .with_label(format!("{} field", axis))
                .with_unit("T")
                .with_validator(Validator::numbers(None, None))
                .with_docstring("Magnet field. Setting sweeps to the target and waits."),
            AxisParam::Sweep => info
                .with_label(format!("{} sweep", axis))
                .with_validator(Validator::labels(&SWEEP_MODES))
                .with_docstring("Sweep state; set one of UP, UP FAST, DOWN, DOWN FAST, PAUSE, ZERO"),
            AxisParam::LowLim => info
                .with_label(format!("{} lower limit", axis))
                .with_unit("kG")
                .with_validator(Validator::numbers(None, None)),
            AxisParam::UpLim => info
                .with_label(format!("{} upper limit", axis))
                .with_unit("kG")
                .with_validator(Validator::numbers(None, None)),
            AxisParam::Units => info
                .with_label(format!("{} units", axis))
                .with_validator(Validator::labels(&["A", "G"]))
                .with_docstring("Display and reply units: A (amps) or G (gauss)"),
            AxisParam::Rate0 => info
                .with_label(format!("{} rate range 0", axis))
                .with_unit("A/s")
                .with_validator(Validator::numbers(Some(0.0), None)),
            AxisParam::Rate1 => info
                .with_label(format!("{} rate range 1", axis))
                .with_unit("A/s")
                .with_validator(Validator::numbers(Some(0.0), None)),
            AxisParam::Heater => info
                .with_label(format!("{} persistent switch heater", axis))
                .with_docstring("true when the persistent switch heater is on"),
        }
    }
}

/// Cryomagnetics 4G driver
pub struct Cryomagnetics4G {
    id: String,
    connection: Connection,
    axes: Vec<String>,
    margin_t: f64,
    poll_interval: Duration,
    sweep_timeout: Duration,
    // Held across CHAN + command.
    channel_lock: Mutex<()>,
    parameters: Vec<ParameterInfo>,
    functions: Vec<FunctionInfo>,
}

impl Cryomagnetics4G {
    /// Build the driver, optionally resetting the supply.
    pub async fn open(connection: Connection, config: &CryomagneticsConfig) -> DriverResult<Self> {
        if config.axes.is_empty() {
            return Err(DriverError::InvalidArgument(
                "at least one magnet axis is required".to_string(),
            ));
        }
        let axes: Vec<String> = config.axes.iter().map(|a| a.to_ascii_uppercase()).collect();

        let parameters = axes
            .iter()
            .flat_map(|axis| AxisParam::ALL.into_iter().map(move |p| p.info(axis)))
            .collect();

        let driver = Self {
            id: connection.id().to_string(),
            connection,
            axes,
            margin_t: config.field_margin_t,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            sweep_timeout: Duration::from_secs(config.sweep_timeout_secs),
            channel_lock: Mutex::new(()),
            parameters,
            functions: vec![
                FunctionInfo::new("local", "Return the supply to front-panel control"),
                FunctionInfo::new("remote", "Put the supply in remote mode"),
                FunctionInfo::new("reset", "Reset the supply (*RST)"),
                FunctionInfo::new("sweep_up", "Sweep toward the upper limit")
                    .with_args(&["axis", "fast"]),
                FunctionInfo::new("sweep_down", "Sweep toward the lower limit")
                    .with_args(&["axis", "fast"]),
                FunctionInfo::new("pause_all", "Pause the sweep on every axis"),
                FunctionInfo::new("zero_all", "Sweep every axis to zero"),
                FunctionInfo::new("set_field_no_wait", "Start a sweep to a field without waiting")
                    .with_args(&["axis", "tesla"]),
            ],
        };

        if config.reset {
            driver.connection.write("*RST").await?;
        }
        info!(
            instrument = %driver.id,
            "Cryomagnetics 4G ready on axes {}",
            driver.axes.join(", ")
        );
        Ok(driver)
    }

    /// Configured axes, upper-case.
    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    fn channel(&self, axis: &str) -> DriverResult<usize> {
        self.axes
            .iter()
            .position(|a| a.eq_ignore_ascii_case(axis))
            .map(|i| i + 1)
            .ok_or_else(|| DriverError::InvalidArgument(format!("Unknown axis {}", axis)))
    }

    /// Select `axis` and send `cmd`.
    async fn axis_write(&self, axis: &str, cmd: &str) -> DriverResult<()> {
        let channel = self.channel(axis)?;
        let _guard = self.channel_lock.lock().await;
        self.connection.write(&format!("CHAN {}", channel)).await?;
        self.connection.write(cmd).await
    }

    /// Select `axis` and query `cmd`.
    async fn axis_ask(&self, axis: &str, cmd: &str) -> DriverResult<String> {
        let channel = self.channel(axis)?;
        let _guard = self.channel_lock.lock().await;
        self.connection.write(&format!("CHAN {}", channel)).await?;
        self.connection.ask(cmd).await
    }

    /// Field on `axis` in tesla.
    pub async fn field(&self, axis: &str) -> DriverResult<f64> {
        let reply = self.axis_ask(axis, "IMAG?").await?;
        let (value, unit) = parse_reading("IMAG?", &reply)?;
        if unit != "kG" {
            warn!(
                "[{}] {} field reported in '{}', expected kG; set units to G",
                self.id, axis, unit
            );
        }
        Ok(value * KG_TO_T)
    }

    /// Current sweep state as reported by `SWEEP?`.
    pub async fn sweep_state(&self, axis: &str) -> DriverResult<String> {
        self.axis_ask(axis, "SWEEP?").await
    }

    /// Start a sweep in `mode`, which must be one of [`SWEEP_MODES`].
    pub async fn set_sweep(&self, axis: &str, mode: &str) -> DriverResult<()> {
        let mode = mode.trim().to_ascii_uppercase();
        if !SWEEP_MODES.contains(&mode.as_str()) {
            return Err(DriverError::validation(
                &format!("{}_sweep", axis.to_ascii_lowercase()),
                format!("invalid sweep mode '{}'", mode),
            ));
        }
        self.axis_write(axis, &format!("SWEEP {}", mode)).await
    }

    /// Sweep up, optionally at the fast rate.
    pub async fn sweep_up(&self, axis: &str, fast: bool) -> DriverResult<()> {
        self.set_sweep(axis, if fast { "UP FAST" } else { "UP" }).await
    }

    /// Sweep down, optionally at the fast rate.
    pub async fn sweep_down(&self, axis: &str, fast: bool) -> DriverResult<()> {
        self.set_sweep(axis, if fast { "DOWN FAST" } else { "DOWN" }).await
    }

    /// Lower sweep limit in kG.
    pub async fn lower_limit(&self, axis: &str) -> DriverResult<f64> {
        let reply = self.axis_ask(axis, "LLIM?").await?;
        Ok(parse_reading("LLIM?", &reply)?.0)
    }

    /// Upper sweep limit in kG.
    pub async fn upper_limit(&self, axis: &str) -> DriverResult<f64> {
        let reply = self.axis_ask(axis, "ULIM?").await?;
        Ok(parse_reading("ULIM?", &reply)?.0)
    }

    /// Set the lower sweep limit in kG.
    pub async fn set_lower_limit(&self, axis: &str, kgauss: f64) -> DriverResult<()> {
        self.axis_write(axis, &format!("LLIM {}", format::fixed(kgauss, 6)))
            .await
    }

    /// Set the upper sweep limit in kG.
    pub async fn set_upper_limit(&self, axis: &str, kgauss: f64) -> DriverResult<()> {
        self.axis_write(axis, &format!("ULIM {}", format::fixed(kgauss, 6)))
            .await
    }

    /// Sweep `axis` toward `target` tesla. With `wait`, poll the field until it
    /// is within the margin or the sweep timeout expires.
    pub async fn sweep_to(&self, axis: &str, target: f64, wait: bool) -> DriverResult<()> {
        let current = self.field(axis).await?;
        debug!("[{}] {} sweep {} T -> {} T", self.id, axis, current, target);

        if target > current {
            self.set_upper_limit(axis, target * T_TO_KG).await?;
            self.sweep_up(axis, false).await?;
        } else {
            self.set_lower_limit(axis, target * T_TO_KG).await?;
            self.sweep_down(axis, false).await?;
        }

        if wait {
            self.wait_for_field(axis, target).await?;
        }
        Ok(())
    }

    async fn wait_for_field(&self, axis: &str, target: f64) -> DriverResult<()> {
        let deadline = tokio::time::Instant::now() + self.sweep_timeout;
        loop {
            let field = self.field(axis).await?;
            if (target - field).abs() <= self.margin_t {
                info!("[{}] {} field reached {} T", self.id, axis, field);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("{} field to reach {} T (last {} T)", axis, target, field),
                    after: self.sweep_timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn split_name<'a>(&self, name: &'a str) -> DriverResult<(&'a str, AxisParam)> {
        // Suffixes never contain '_', axis names may.
        name.rsplit_once('_')
            .and_then(|(axis, suffix)| Some((axis, AxisParam::from_suffix(suffix)?)))
            .ok_or_else(|| DriverError::unknown_parameter(&self.id, name))
    }
}

#[async_trait]
impl Driver for Cryomagnetics4G {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "4G"
    }

    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    async fn read_parameter(&self, name: &str) -> DriverResult<ParamValue> {
        let (axis, param) = self.split_name(name)?;
        let value = match param {
            AxisParam::Field => ParamValue::Float(self.field(axis).await?),
            AxisParam::Sweep => ParamValue::Text(self.sweep_state(axis).await?),
            AxisParam::LowLim => ParamValue::Float(self.lower_limit(axis).await?),
            AxisParam::UpLim => ParamValue::Float(self.upper_limit(axis).await?),
            AxisParam::Units => ParamValue::Text(self.axis_ask(axis, "UNITS?").await?),
            AxisParam::Rate0 | AxisParam::Rate1 => {
                let cmd = if param == AxisParam::Rate0 { "RATE? 0" } else { "RATE? 1" };
                let reply = self.axis_ask(axis, cmd).await?;
                ParamValue::Float(parse_float(cmd, &reply)?)
            }
            AxisParam::Heater => {
                let reply = self.axis_ask(axis, "PSHTR?").await?;
                ParamValue::Bool(reply.starts_with('1'))
            }
        };
        Ok(value)
    }

    async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()> {
        let (axis, param) = self.split_name(name)?;
        match param {
            AxisParam::Field => {
                let target = value.as_f64().unwrap_or_default();
                self.sweep_to(axis, target, true).await
            }
            AxisParam::Sweep => self.set_sweep(axis, &value.to_string()).await,
            AxisParam::LowLim => {
                self.set_lower_limit(axis, value.as_f64().unwrap_or_default())
                    .await
            }
            AxisParam::UpLim => {
                self.set_upper_limit(axis, value.as_f64().unwrap_or_default())
                    .await
            }
            AxisParam::Units => {
                let unit = value.to_string().to_ascii_uppercase();
                self.axis_write(axis, &format!("UNITS {}", unit)).await
            }
            AxisParam::Rate0 | AxisParam::Rate1 => {
                let range = if param == AxisParam::Rate0 { 0 } else { 1 };
                let rate = value.as_f64().unwrap_or_default();
                self.axis_write(axis, &format!("RATE {} {}", range, format::fixed(rate, 3)))
                    .await
            }
            AxisParam::Heater => {
                let on = value
                    .as_bool()
                    .ok_or_else(|| DriverError::validation(name, format!("'{}' is not on/off", value)))?;
                self.axis_write(axis, if on { "PSHTR ON" } else { "PSHTR OFF" })
                    .await
            }
        }
    }

    async fn invoke(&self, name: &str, args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
        match name {
            "local" => self.connection.write("LOCAL").await?,
            "remote" => self.connection.write("REMOTE").await?,
            "reset" => self.connection.write("*RST").await?,
            "sweep_up" => {
                self.sweep_up(&text_arg(name, args, 0)?, bool_arg(name, args, 1)?)
                    .await?
            }
            "sweep_down" => {
                self.sweep_down(&text_arg(name, args, 0)?, bool_arg(name, args, 1)?)
                    .await?
            }
            "pause_all" | "zero_all" => {
                let mode = if name == "pause_all" { "PAUSE" } else { "ZERO" };
                for axis in &self.axes {
                    self.set_sweep(axis, mode).await?;
                }
            }
            "set_field_no_wait" => {
                self.sweep_to(&text_arg(name, args, 0)?, float_arg(name, args, 1)?, false)
                    .await?
            }
            _ => return Err(DriverError::unknown_function(&self.id, name)),
        }
        Ok(None)
    }
}
