//! Rohde & Schwarz FSW signal and spectrum analyzer.
//!
//! Covers the frequency axis, marker power readouts and display control. The
//! analyzer rounds frequencies to its own grid, so `start` and `stop` are read
//! back after setting and a mismatch is logged.

use async_trait::async_trait;
use std::time::Instant;
use tracing::warn;

use crate::core::{int_arg, parse_float, Driver};
use crate::error::{DriverError, DriverResult};
use crate::instrument::{connect_message, format, Connection, ConnectionSettings};
use crate::parameter::{FunctionInfo, ParamValue, ParameterInfo, Validator};

/// Line terminator for both directions.
pub const TERMINATOR: &str = "\n";

/// Connection defaults for this instrument.
pub fn default_connection() -> ConnectionSettings {
    ConnectionSettings::with_terminator(TERMINATOR)
}

/// Strip trailing whitespace and one pair of surrounding quotes from a
/// string reply (`'"Spectrum"\n'` → `Spectrum`).
///
/// None of the driver's parameters return strings; this is for callers
/// sending string queries such as `INST?` through [`Connection::ask`].
pub fn strip_quotes(reply: &str) -> &str {
    let trimmed = reply.trim_end();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn grid_command(rows: i64, cols: i64) -> String {
    format!("DISP:LAY GRID;:DISP:LAY:GRID {},{}", rows, cols)
}

/// R&S FSW driver
pub struct RohdeSchwarzFsw {
    id: String,
    model: String,
    connection: Connection,
    parameters: Vec<ParameterInfo>,
    functions: Vec<FunctionInfo>,
}

impl RohdeSchwarzFsw {
    /// Identify, switch display updates on and log the connect message.
    pub async fn open(connection: Connection) -> DriverResult<Self> {
        let started = Instant::now();
        let idn = connection.identify().await?;
        let model = idn.model_family().to_string();

        connection.write("SYST:DISP:UPD ON").await?;
        connect_message(connection.id(), &idn, started);

        let frequency = |name: &str, label: &str| {
            ParameterInfo::new(name)
                .with_label(label)
                .with_unit("Hz")
                .with_validator(Validator::numbers(Some(0.0), None))
        };

        Ok(Self {
            id: connection.id().to_string(),
            model,
            connection,
            parameters: vec![
                frequency("start", "Start frequency")
                    .with_docstring("Must stay below stop; the applied value is read back"),
                frequency("stop", "Stop frequency")
                    .with_docstring("Must stay above start; the applied value is read back"),
                frequency("center", "Center frequency"),
                frequency("span", "Frequency span"),
                ParameterInfo::new("npts")
                    .with_label("Sweep points")
                    .with_validator(Validator::ints(Some(1), None)),
                ParameterInfo::new("power")
                    .with_label("Marker channel power")
                    .with_unit("dBm")
                    .read_only(),
                ParameterInfo::new("obwpower")
                    .with_label("Marker ACP power")
                    .with_unit("dBm")
                    .read_only(),
            ],
            functions: vec![
                FunctionInfo::new("reset", "Reset the analyzer (*RST)"),
                FunctionInfo::new("tooltip_on", "Show SCPI error tooltips"),
                FunctionInfo::new("tooltip_off", "Hide SCPI error tooltips"),
                FunctionInfo::new("cont_meas_on", "Continuous measurement on all channels"),
                FunctionInfo::new("cont_meas_off", "Single measurement on all channels"),
                FunctionInfo::new("update_display_once", "Refresh the display once"),
                FunctionInfo::new("update_display_on", "Keep the display updating in remote"),
                FunctionInfo::new("update_display_off", "Freeze the display in remote"),
                FunctionInfo::new("display_single_window", "One window"),
                FunctionInfo::new("display_dual_window", "Two windows stacked"),
                FunctionInfo::new("display_grid", "Lay windows out in a grid")
                    .with_args(&["rows", "cols"]),
            ],
        })
    }

    async fn query_float(&self, cmd: &str) -> DriverResult<f64> {
        let reply = self.connection.ask(cmd).await?;
        parse_float(cmd, &reply)
    }

    /// Start frequency in Hz.
    pub async fn start(&self) -> DriverResult<f64> {
        self.query_float("SENS:FREQ:START?").await
    }

    /// Stop frequency in Hz.
    pub async fn stop(&self) -> DriverResult<f64> {
        self.query_float("SENS:FREQ:STOP?").await
    }

    /// Set the start frequency; rejected unless below the current stop.
    pub async fn set_start(&self, hz: f64) -> DriverResult<()> {
        let stop = self.stop().await?;
        if hz >= stop {
            return Err(DriverError::validation(
                "start",
                format!("Stop frequency ({}) must be larger than start frequency ({})", stop, hz),
            ));
        }
        self.connection
            .write(&format!("SENS:FREQ:START {}", format::fixed(hz, 7)))
            .await?;

        let applied = self.start().await?;
        if applied != hz {
            warn!("[{}] Could not set start to {} setting it to {}", self.id, hz, applied);
        }
        Ok(())
    }

    /// Set the stop frequency; rejected unless above the current start.
    pub async fn set_stop(&self, hz: f64) -> DriverResult<()> {
        let start = self.start().await?;
        if hz <= start {
            return Err(DriverError::validation(
                "stop",
                format!("Stop frequency ({}) must be larger than start frequency ({})", hz, start),
            ));
        }
        self.connection
            .write(&format!("SENS:FREQ:STOP {}", format::fixed(hz, 7)))
            .await?;

        let applied = self.stop().await?;
        if applied != hz {
            warn!("[{}] Could not set stop to {} setting it to {}", self.id, hz, applied);
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for RohdeSchwarzFsw {
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
        let value = match name {
            "start" => self.start().await?,
            "stop" => self.stop().await?,
            "center" => self.query_float("SENS:FREQ:CENT?").await?,
            "span" => self.query_float("SENS:FREQ:SPAN?").await?,
            "npts" => {
                let points = self.query_float("SENS:SWE:POIN?").await?;
                return Ok(ParamValue::Int(points.round() as i64));
            }
            "power" => self.query_float("CALC:MARK:FUNC:POW:RES?").await?,
            "obwpower" => self.query_float("CALC:MARK:FUNC:POW:RES? ACP").await?,
            _ => return Err(DriverError::unknown_parameter(&self.id, name)),
        };
        Ok(ParamValue::Float(value))
    }

    async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()> {
        match name {
            "start" => self.set_start(value.as_f64().unwrap_or_default()).await,
            "stop" => self.set_stop(value.as_f64().unwrap_or_default()).await,
            "npts" => {
                let points = value.as_i64().unwrap_or_default();
                self.connection
                    .write(&format!("SENS:SWE:POIN {}", points))
                    .await
            }
            "center" | "span" => {
                let header = if name == "center" {
                    "SENS:FREQ:CENT"
                } else {
                    "SENS:FREQ:SPAN"
                };
                let hz = value.as_f64().unwrap_or_default();
                self.connection
                    .write(&format!("{} {}", header, format::fixed(hz, 7)))
                    .await
            }
            _ => Err(DriverError::unknown_parameter(&self.id, name)),
        }
    }

    async fn invoke(&self, name: &str, args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
        let cmd = match name {
            "reset" => "*RST".to_string(),
            "tooltip_on" => "SYST:ERR:DISP ON".to_string(),
            "tooltip_off" => "SYST:ERR:DISP OFF".to_string(),
            "cont_meas_on" => "INIT:CONT:ALL ON".to_string(),
            "cont_meas_off" => "INIT:CONT:ALL OFF".to_string(),
            "update_display_once" => "SYST:DISP:UPD ONCE".to_string(),
            "update_display_on" => "SYST:DISP:UPD ON".to_string(),
            "update_display_off" => "SYST:DISP:UPD OFF".to_string(),
            "display_single_window" => grid_command(1, 1),
            "display_dual_window" => grid_command(2, 1),
            "display_grid" => {
                let rows = int_arg(name, args, 0)?;
                let cols = int_arg(name, args, 1)?;
                if rows < 1 || cols < 1 {
                    return Err(DriverError::InvalidArgument(format!(
                        "display_grid needs at least one row and column, got {}x{}",
                        rows, cols
                    )));
                }
                grid_command(rows, cols)
            }
            _ => return Err(DriverError::unknown_function(&self.id, name)),
        };
        self.connection.write(&cmd).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use tracing_test::traced_test;

    async fn analyzer(mock: &MockAdapter) -> RohdeSchwarzFsw {
        let mock = mock
            .clone()
            .with_reply("*IDN?", "Rohde&Schwarz,FSW-26,1312.8000K26/101234,2.30");
        let conn = Connection::new("fsw", Box::new(mock), default_connection());
        RohdeSchwarzFsw::open(conn).await.unwrap()
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"Spectrum\"\n"), "Spectrum");
        assert_eq!(strip_quotes("'C:\\R_S'  "), "C:\\R_S");
        assert_eq!(strip_quotes("SAN"), "SAN");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[tokio::test]
    async fn test_string_query_through_connection() {
        let mock = MockAdapter::new().with_reply("INST?", "\"SAN\"");
        let fsw = analyzer(&mock).await;

        let reply = fsw.connection().ask("INST?").await.unwrap();
        assert_eq!(strip_quotes(&reply), "SAN");
    }

    #[tokio::test]
    async fn test_open_sequence() {
        let mock = MockAdapter::new();
        let fsw = analyzer(&mock).await;
        assert_eq!(fsw.model(), "FSW");
        assert_eq!(mock.written(), vec!["*IDN?", "SYST:DISP:UPD ON"]);
    }

    #[tokio::test]
    async fn test_set_start_checks_stop_first() {
        let mock = MockAdapter::new()
            .with_reply("SENS:FREQ:STOP?", "2.0E+09")
            .with_reply("SENS:FREQ:START?", "1.0E+09");
        let fsw = analyzer(&mock).await;
        mock.clear_log();

        fsw.set("start", ParamValue::Float(1.0e9)).await.unwrap();
        assert_eq!(
            mock.written(),
            vec!["SENS:FREQ:STOP?", "SENS:FREQ:START 1000000000.0000000", "SENS:FREQ:START?"]
        );

        mock.clear_log();
        let err = fsw.set("start", ParamValue::Float(3.0e9)).await.unwrap_err();
        assert!(matches!(err, DriverError::Validation { .. }));
        assert_eq!(mock.written(), vec!["SENS:FREQ:STOP?"]);
    }

    #[tokio::test]
    async fn test_set_stop_rejects_below_start() {
        let mock = MockAdapter::new().with_reply("SENS:FREQ:START?", "1.0E+09");
        let fsw = analyzer(&mock).await;
        mock.clear_log();

        assert!(fsw.set("stop", ParamValue::Float(1.0e9)).await.is_err());
        assert_eq!(mock.written(), vec!["SENS:FREQ:START?"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_readback_mismatch_warns() {
        let mock = MockAdapter::new()
            .with_reply("SENS:FREQ:START?", "1.0E+09")
            .with_reply("SENS:FREQ:STOP?", "2.00000001E+09");
        let fsw = analyzer(&mock).await;

        fsw.set("stop", ParamValue::Float(2.0e9)).await.unwrap();
        assert!(logs_contain("Could not set stop to 2000000000"));
    }

    #[tokio::test]
    async fn test_read_only_and_npts() {
        let mock = MockAdapter::new()
            .with_reply("CALC:MARK:FUNC:POW:RES?", "-23.5")
            .with_reply("CALC:MARK:FUNC:POW:RES? ACP", "-30.25")
            .with_reply("SENS:SWE:POIN?", "1001");
        let fsw = analyzer(&mock).await;

        assert_eq!(fsw.get("power").await.unwrap(), ParamValue::Float(-23.5));
        assert_eq!(fsw.get("obwpower").await.unwrap(), ParamValue::Float(-30.25));
        assert_eq!(fsw.get("npts").await.unwrap(), ParamValue::Int(1001));
        assert!(matches!(
            fsw.set("power", ParamValue::Float(0.0)).await,
            Err(DriverError::ReadOnly(_))
        ));

        mock.clear_log();
        fsw.set("npts", ParamValue::Int(201)).await.unwrap();
        fsw.set("center", ParamValue::Float(5.0e9)).await.unwrap();
        fsw.set("span", ParamValue::Float(1.0e6)).await.unwrap();
        assert_eq!(
            mock.written(),
            vec![
                "SENS:SWE:POIN 201",
                "SENS:FREQ:CENT 5000000000.0000000",
                "SENS:FREQ:SPAN 1000000.0000000",
            ]
        );
    }

    #[tokio::test]
    async fn test_display_functions() {
        let mock = MockAdapter::new();
        let fsw = analyzer(&mock).await;
        mock.clear_log();

        fsw.call("display_single_window", &[]).await.unwrap();
        fsw.call("display_dual_window", &[]).await.unwrap();
        fsw.call("display_grid", &[ParamValue::Int(2), ParamValue::Int(3)])
            .await
            .unwrap();
        fsw.call("cont_meas_off", &[]).await.unwrap();
        assert!(fsw
            .call("display_grid", &[ParamValue::Int(0), ParamValue::Int(3)])
            .await
            .is_err());
        assert_eq!(
            mock.written(),
            vec![
                "DISP:LAY GRID;:DISP:LAY:GRID 1,1",
                "DISP:LAY GRID;:DISP:LAY:GRID 2,1",
                "DISP:LAY GRID;:DISP:LAY:GRID 2,3",
                "INIT:CONT:ALL OFF",
            ]
        );
    }

    #[tokio::test]
    async fn test_unlisted_names_send_nothing() {
        let mock = MockAdapter::new().with_fallback("0");
        let fsw = analyzer(&mock).await;
        mock.clear_log();

        assert!(matches!(
            fsw.read_parameter("rbw").await,
            Err(DriverError::UnknownParameter { .. })
        ));
        assert!(matches!(
            fsw.write_parameter("rbw", ParamValue::Float(1.0e3)).await,
            Err(DriverError::UnknownParameter { .. })
        ));
        assert!(matches!(
            fsw.invoke("display_quad_window", &[]).await,
            Err(DriverError::UnknownFunction { .. })
        ));
        assert!(mock.written().is_empty());
    }
}
