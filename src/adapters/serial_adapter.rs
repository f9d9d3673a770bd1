//! Serial adapter for RS-232 / USB-serial instruments.
//!
//! Line settings ([`SerialSettings`]) are always compiled so configuration files
//! can be parsed and validated everywhere; the port itself needs the
//! `instrument_serial` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Adapter;
use crate::error::AdapterError;

#[cfg(feature = "instrument_serial")]
use super::{drain_input, read_frame, FrameBuffer, DRAIN_QUIET};
#[cfg(feature = "instrument_serial")]
use tokio::io::AsyncWriteExt;
#[cfg(feature = "instrument_serial")]
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Parity bit setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No flow control
    #[default]
    None,
    /// XON/XOFF software flow control
    #[serde(alias = "software")]
    XonXoff,
    /// RTS/CTS hardware flow control
    #[serde(alias = "hardware")]
    RtsCts,
}

/// Complete serial line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate (e.g. 9600)
    pub baud_rate: u32,
    /// Data bits, 5 to 8
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    /// 9600 baud, 8N1, no flow control.
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialSettings {
    /// Same settings with a different flow control mode.
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Serial port adapter
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Line settings the port was opened with
    settings: SerialSettings,

    #[cfg(feature = "instrument_serial")]
    port: SerialStream,

    #[cfg(feature = "instrument_serial")]
    buffer: FrameBuffer,
}

impl SerialAdapter {
    /// Open `port_name` with the given line settings.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port_name: &str, settings: SerialSettings) -> Result<Self, AdapterError> {
        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(AdapterError::InvalidResource(format!(
                    "unsupported data bits: {}",
                    other
                )))
            }
        };
        let parity = match settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        };
        let flow_control = match settings.flow_control {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::XonXoff => tokio_serial::FlowControl::Software,
            FlowControl::RtsCts => tokio_serial::FlowControl::Hardware,
        };

        let port = tokio_serial::new(port_name, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| {
                AdapterError::ConnectionFailed(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    port_name, settings.baud_rate, e
                ))
            })?;

        debug!(
            "Serial port '{}' opened at {} baud ({:?})",
            port_name, settings.baud_rate, settings.flow_control
        );

        Ok(Self {
            port_name: port_name.to_string(),
            settings,
            port,
            buffer: FrameBuffer::default(),
        })
    }

    /// Serial support is compiled out.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(port_name: &str, settings: SerialSettings) -> Result<Self, AdapterError> {
        let _ = (port_name, settings);
        Err(AdapterError::FeatureDisabled("instrument_serial"))
    }

    /// Line settings in effect.
    pub fn settings(&self) -> SerialSettings {
        self.settings
    }
}

#[async_trait]
impl Adapter for SerialAdapter {
    fn adapter_type(&self) -> &str {
        "serial"
    }

    fn info(&self) -> String {
        format!(
            "SerialAdapter({} @ {} baud)",
            self.port_name, self.settings.baud_rate
        )
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.write_all(data).await?;
            self.port.flush().await?;
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = data;
            Err(AdapterError::FeatureDisabled("instrument_serial"))
        }
    }

    async fn read_until(
        &mut self,
        delimiter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError> {
        #[cfg(feature = "instrument_serial")]
        {
            read_frame(&mut self.port, &mut self.buffer, delimiter, timeout).await
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (delimiter, timeout);
            Err(AdapterError::FeatureDisabled("instrument_serial"))
        }
    }

    async fn clear(&mut self) -> Result<(), AdapterError> {
        #[cfg(feature = "instrument_serial")]
        {
            self.port
                .clear(tokio_serial::ClearBuffer::Input)
                .map_err(|e| AdapterError::Io(e.into()))?;
            let discarded = drain_input(&mut self.port, &mut self.buffer, DRAIN_QUIET).await?;
            if discarded > 0 {
                debug!("Discarded {} unread byte(s) from {}", discarded, self.port_name);
            }
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Ok(())
        }
    }
}
