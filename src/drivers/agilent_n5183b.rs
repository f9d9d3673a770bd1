//! Agilent N5183B MXG microwave signal generator.
//!
//! A small SCPI surface: CW frequency, output power and the RF switch.
//!
//! ## Configuration
//!
//! ```toml
//! [[instruments]]
//! id = "lo"
//! driver = "agilent_n5183b"
//! transport = { type = "tcp", host = "192.168.1.20", port = 5025 }
//! ```

use async_trait::async_trait;
use std::time::Instant;

use crate::core::{parse_float, Driver};
use crate::error::{DriverError, DriverResult};
use crate::instrument::{connect_message, format, Connection, ConnectionSettings};
use crate::parameter::{FunctionInfo, ParamValue, ParameterInfo, Validator};

/// Line terminator for both directions.
pub const TERMINATOR: &str = "\n";

/// Connection defaults for this instrument.
pub fn default_connection() -> ConnectionSettings {
    ConnectionSettings::with_terminator(TERMINATOR)
}

/// Agilent N5183B driver
pub struct AgilentN5183B {
    id: String,
    model: String,
    connection: Connection,
    parameters: Vec<ParameterInfo>,
    functions: Vec<FunctionInfo>,
}

impl AgilentN5183B {
    /// Identify the instrument and log the connect message.
    pub async fn open(connection: Connection) -> DriverResult<Self> {
        let started = Instant::now();
        let idn = connection.identify().await?;
        connect_message(connection.id(), &idn, started);

        Ok(Self {
            id: connection.id().to_string(),
            model: idn.model,
            connection,
            parameters: vec![
                ParameterInfo::new("frequency")
                    .with_label("Frequency")
                    .with_unit("Hz")
                    .with_validator(Validator::numbers(Some(0.0), None))
                    .with_docstring("CW output frequency"),
                ParameterInfo::new("power")
                    .with_label("Power")
                    .with_unit("dBm")
                    .with_validator(Validator::numbers(None, None))
                    .with_docstring("Output power level"),
            ],
            functions: vec![
                FunctionInfo::new("rf_on", "Switch the RF output on"),
                FunctionInfo::new("rf_off", "Switch the RF output off"),
                FunctionInfo::new("reset", "Reset to factory defaults (*RST)"),
            ],
        })
    }
}

#[async_trait]
impl Driver for AgilentN5183B {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
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
        let cmd = match name {
            "frequency" => ":FREQuency:CW?",
            "power" => ":POW?",
            _ => return Err(DriverError::unknown_parameter(&self.id, name)),
        };
        let reply = self.connection.ask(cmd).await?;
        Ok(ParamValue::Float(parse_float(cmd, &reply)?))
    }

    async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()> {
        // Validators guarantee a number here.
        let value = value.as_f64().unwrap_or_default();
        let cmd = match name {
            "frequency" => format!(":FREQuency:CW {} Hz", format::fixed(value, 6)),
            "power" => format!(":POW {}", format::fixed(value, 6)),
            _ => return Err(DriverError::unknown_parameter(&self.id, name)),
        };
        self.connection.write(&cmd).await
    }

    async fn invoke(&self, name: &str, _args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
        let cmd = match name {
            "rf_on" => "OUTP ON",
            "rf_off" => "OUTP OFF",
            "reset" => "*RST",
            _ => return Err(DriverError::unknown_function(&self.id, name)),
        };
        self.connection.write(cmd).await?;
        Ok(None)
    }
}
