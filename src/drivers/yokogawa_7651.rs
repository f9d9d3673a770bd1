//! Yokogawa 7651 programmable DC source, used as a current source.
//!
//! The 7651 predates SCPI: commands are single letters closed by `E`, and the
//! status reply to `OC` carries the output state in bit 4.

use async_trait::async_trait;
use tracing::warn;

use crate::core::{parse_float, Driver};
use crate::error::{DriverError, DriverResult};
use crate::instrument::{format, Connection, ConnectionSettings};
use crate::parameter::{FunctionInfo, ParamValue, ParameterInfo, ValueMapping, Validator};

/// Line terminator for both directions.
pub const TERMINATOR: &str = "\r\n";

/// Output-on flag in the `OC` status word.
const OUTPUT_BIT: i64 = 0b1_0000;

/// Connection defaults for this instrument.
pub fn default_connection() -> ConnectionSettings {
    ConnectionSettings::with_terminator(TERMINATOR)
}

/// Output state from an `OC` reply such as `STS1=16`.
pub fn parse_output_state(reply: &str) -> DriverResult<bool> {
    let status = reply
        .get(5..)
        .map(str::trim)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DriverError::parse("OC", reply, "expected a status word after 5 characters"))?;
    Ok(status & OUTPUT_BIT != 0)
}

/// Current from an `OD` reply such as `NDCA+1.0000E-03`.
pub fn parse_current(reply: &str) -> DriverResult<f64> {
    parse_float("OD", &reply.replace("NDCA", ""))
}

/// Yokogawa 7651 driver
pub struct Yokogawa7651 {
    id: String,
    connection: Connection,
    parameters: Vec<ParameterInfo>,
    functions: Vec<FunctionInfo>,
}

impl Yokogawa7651 {
    /// Build the driver. The source must be in current mode on the front panel.
    pub fn open(connection: Connection) -> Self {
        warn!(
            instrument = connection.id(),
            "Yoko 7651 as current generator. Switch the instrument to current mode!"
        );

        Self {
            id: connection.id().to_string(),
            connection,
            parameters: vec![
                ParameterInfo::new("output")
                    .with_label("Output State")
                    .with_mapping(ValueMapping::on_off()),
                ParameterInfo::new("current")
                    .with_label("Current")
                    .with_unit("A")
                    .with_validator(Validator::numbers(None, None)),
            ],
            functions: vec![
                FunctionInfo::new("on", "Turn output on"),
                FunctionInfo::new("off", "Turn output off"),
            ],
        }
    }

    /// Switch the output.
    pub async fn set_output(&self, on: bool) -> DriverResult<()> {
        self.connection.write(if on { "O1E" } else { "O0E" }).await
    }

    /// Whether the output is on.
    pub async fn output(&self) -> DriverResult<bool> {
        parse_output_state(&self.connection.ask("OC").await?)
    }

    /// Output current in amps.
    pub async fn current(&self) -> DriverResult<f64> {
        parse_current(&self.connection.ask("OD").await?)
    }

    /// Set the output current in amps.
    pub async fn set_current(&self, amps: f64) -> DriverResult<()> {
        self.connection
            .write(&format!("S{}E", format::scientific(amps, 6)))
            .await
    }
}

#[async_trait]
impl Driver for Yokogawa7651 {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "7651"
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
        match name {
            "output" => Ok(ParamValue::Int(self.output().await?.into())),
            "current" => Ok(ParamValue::Float(self.current().await?)),
            _ => Err(DriverError::unknown_parameter(&self.id, name)),
        }
    }

    async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()> {
        match name {
            "output" => self.set_output(value.as_bool().unwrap_or_default()).await,
            "current" => self.set_current(value.as_f64().unwrap_or_default()).await,
            _ => Err(DriverError::unknown_parameter(&self.id, name)),
        }
    }

    async fn invoke(&self, name: &str, _args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
        match name {
            "on" => self.set_output(true).await?,
            "off" => self.set_output(false).await?,
            _ => return Err(DriverError::unknown_function(&self.id, name)),
        }
        Ok(None)
    }
}
