//! University of Basel SP927 LNHR DAC (8 channels).
//!
//! Voltages travel as 24-bit codes in upper-case hex:
//!
//! ```text
//! code = round((volt + 10) * 838848)
//! volt = code / 838848 - 10
//! ```
//!
//! The DAC answers every command, including settings, so settings are sent as
//! queries and the acknowledgement is consumed.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::adapters::{FlowControl, SerialSettings};
use crate::config::Sp927Config;
use crate::core::{float_arg, Driver};
use crate::error::{DriverError, DriverResult};
use crate::instrument::{format, Connection, ConnectionSettings};
use crate::parameter::{FunctionInfo, ParamValue, ParameterInfo, Validator};

/// Number of output channels.
pub const NUM_CHANNELS: u8 = 8;

/// DAC codes per volt.
pub const CODES_PER_VOLT: f64 = 838_848.0;

/// Write terminator.
pub const WRITE_TERMINATOR: &str = "\n";

/// Read terminator.
pub const READ_TERMINATOR: &str = "\r\n";

/// Connection defaults for this instrument.
pub fn default_connection() -> ConnectionSettings {
    ConnectionSettings {
        write_terminator: WRITE_TERMINATOR.to_string(),
        read_terminator: READ_TERMINATOR.to_string(),
        ..ConnectionSettings::default()
    }
}

/// Serial line defaults: 9600 baud, 8N1, XON/XOFF.
pub fn serial_settings() -> SerialSettings {
    SerialSettings::default().with_flow_control(FlowControl::XonXoff)
}

/// Voltage → DAC code for the range `min_volt <= volt < max_volt`.
pub fn volt_to_code(volt: f64, min_volt: f64, max_volt: f64) -> Result<u32, String> {
    if !(volt >= min_volt && volt < max_volt) {
        return Err(format!(
            "Value out of range: {} V ({} V - {} V).",
            volt, min_volt, max_volt
        ));
    }
    let code = ((volt + 10.0) * CODES_PER_VOLT).round();
    if !(0.0..=f64::from(u32::MAX)).contains(&code) {
        return Err(format!("{} V is outside the DAC code range", volt));
    }
    Ok(code as u32)
}

/// Hex reply → voltage.
pub fn code_to_volt(command: &str, reply: &str) -> DriverResult<f64> {
    let code = u32::from_str_radix(reply.trim(), 16)
        .map_err(|e| DriverError::parse(command, reply, e))?;
    Ok(f64::from(code) / CODES_PER_VOLT - 10.0)
}

/// SP927 driver
pub struct UnibaselSp927 {
    id: String,
    connection: Connection,
    min_volt: f64,
    max_volt: f64,
    parameters: Vec<ParameterInfo>,
    functions: Vec<FunctionInfo>,
}

impl UnibaselSp927 {
    /// Build the driver for the voltage window in `config`.
    pub fn open(connection: Connection, config: &Sp927Config) -> DriverResult<Self> {
        if !(config.min_volt < config.max_volt) {
            return Err(DriverError::InvalidArgument(format!(
                "min_volt ({}) must be below max_volt ({})",
                config.min_volt, config.max_volt
            )));
        }

        let parameters = (1..=NUM_CHANNELS)
            .map(|chan| {
                ParameterInfo::new(format!("ch{}_volt", chan))
                    .with_label(format!("Channel {} voltage", chan))
                    .with_unit("V")
                    .with_validator(Validator::numbers(Some(config.min_volt), Some(config.max_volt)))
            })
            .collect();

        info!(
            instrument = connection.id(),
            "SP927 LNHR DAC, {} channels, {} V to {} V",
            NUM_CHANNELS,
            config.min_volt,
            config.max_volt
        );

        Ok(Self {
            id: connection.id().to_string(),
            connection,
            min_volt: config.min_volt,
            max_volt: config.max_volt,
            parameters,
            functions: vec![FunctionInfo::new(
                "set_all",
                "Set every channel to the same voltage, one after another",
            )
            .with_args(&["volt"])],
        })
    }

    fn check_channel(chan: u8) -> DriverResult<()> {
        if (1..=NUM_CHANNELS).contains(&chan) {
            Ok(())
        } else {
            Err(DriverError::InvalidArgument(format!(
                "channel {} is outside 1..={}",
                chan, NUM_CHANNELS
            )))
        }
    }

    /// Output voltage of `chan`.
    pub async fn voltage(&self, chan: u8) -> DriverResult<f64> {
        Self::check_channel(chan)?;
        let cmd = format!("{} V?", chan);
        let reply = self.connection.ask(&cmd).await?;
        code_to_volt(&cmd, &reply)
    }

    /// Set the output voltage of `chan`.
    pub async fn set_voltage(&self, chan: u8, volt: f64) -> DriverResult<()> {
        Self::check_channel(chan)?;
        let code = volt_to_code(volt, self.min_volt, self.max_volt)
            .map_err(|reason| DriverError::validation(&format!("ch{}_volt", chan), reason))?;
        let cmd = format!("{} {}", chan, format::hex_upper(code));
        let ack = self.connection.ask(&cmd).await?;
        debug!("[{}] {} acknowledged with '{}'", self.id, cmd, ack);
        Ok(())
    }

    /// Set all channels to `volt`, in channel order.
    pub async fn set_all(&self, volt: f64) -> DriverResult<()> {
        for chan in 1..=NUM_CHANNELS {
            self.set_voltage(chan, volt).await?;
        }
        Ok(())
    }

    fn channel_of(&self, name: &str) -> DriverResult<u8> {
        name.strip_prefix("ch")
            .and_then(|rest| rest.strip_suffix("_volt"))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| DriverError::unknown_parameter(&self.id, name))
    }
}

#[async_trait]
impl Driver for UnibaselSp927 {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "SP927"
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
        let chan = self.channel_of(name)?;
        Ok(ParamValue::Float(self.voltage(chan).await?))
    }

    async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()> {
        let chan = self.channel_of(name)?;
        self.set_voltage(chan, value.as_f64().unwrap_or_default())
            .await
    }

    async fn invoke(&self, name: &str, args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
        match name {
            "set_all" => self.set_all(float_arg(name, args, 0)?).await?,
            _ => return Err(DriverError::unknown_function(&self.id, name)),
        }
        Ok(None)
    }
}
