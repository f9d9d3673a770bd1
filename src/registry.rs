//! Driver construction from configuration.
//!
//! [`open_instrument`] turns one [`InstrumentDefinition`] into a ready driver:
//! it opens the transport, layers configured overrides over the driver's
//! terminator and serial defaults, and runs the driver's connect sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

use crate::adapters::{Adapter, MockAdapter, SerialAdapter, SerialSettings, TcpAdapter, VisaAdapter};
use crate::config::{InstrumentDefinition, Settings, TimeoutSettings, TransportConfig};
use crate::core::Driver;
use crate::drivers::{
    agilent_n5183b, cryomagnetics_4g, rohde_schwarz_fsw, unibasel_sp927, yokogawa_7651,
    AgilentN5183B, Cryomagnetics4G, RohdeSchwarzFsw, UnibaselSp927, Yokogawa7651,
};
use crate::error::{AdapterError, DriverError, DriverResult};
use crate::instrument::{Connection, ConnectionSettings};

/// Supported drivers, by configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    /// Agilent N5183B signal generator
    #[serde(rename = "agilent_n5183b")]
    AgilentN5183B,
    /// Cryomagnetics 4G magnet power supply
    #[serde(rename = "cryomagnetics_4g")]
    Cryomagnetics4G,
    /// Rohde & Schwarz FSW spectrum analyzer
    #[serde(rename = "rohde_schwarz_fsw")]
    RohdeSchwarzFsw,
    /// University of Basel SP927 DAC
    #[serde(rename = "unibasel_sp927")]
    UnibaselSp927,
    /// Yokogawa 7651 DC source
    #[serde(rename = "yokogawa_7651")]
    Yokogawa7651,
}

impl DriverKind {
    /// Every supported driver.
    pub const ALL: [DriverKind; 5] = [
        DriverKind::AgilentN5183B,
        DriverKind::Cryomagnetics4G,
        DriverKind::RohdeSchwarzFsw,
        DriverKind::UnibaselSp927,
        DriverKind::Yokogawa7651,
    ];

    /// Configuration name.
    pub fn name(self) -> &'static str {
        match self {
            DriverKind::AgilentN5183B => "agilent_n5183b",
            DriverKind::Cryomagnetics4G => "cryomagnetics_4g",
            DriverKind::RohdeSchwarzFsw => "rohde_schwarz_fsw",
            DriverKind::UnibaselSp927 => "unibasel_sp927",
            DriverKind::Yokogawa7651 => "yokogawa_7651",
        }
    }

    /// Terminators the instrument expects.
    pub fn default_connection(self) -> ConnectionSettings {
        match self {
            DriverKind::AgilentN5183B => agilent_n5183b::default_connection(),
            DriverKind::Cryomagnetics4G => cryomagnetics_4g::default_connection(),
            DriverKind::RohdeSchwarzFsw => rohde_schwarz_fsw::default_connection(),
            DriverKind::UnibaselSp927 => unibasel_sp927::default_connection(),
            DriverKind::Yokogawa7651 => yokogawa_7651::default_connection(),
        }
    }

    /// Serial line settings used when the configuration leaves them unset.
    pub fn default_serial(self) -> SerialSettings {
        match self {
            DriverKind::Cryomagnetics4G => cryomagnetics_4g::serial_settings(),
            DriverKind::UnibaselSp927 => unibasel_sp927::serial_settings(),
            _ => SerialSettings::default(),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                DriverError::InvalidArgument(format!(
                    "Unknown driver '{}'. Must be one of: {}",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// Merge configured serial fields over the driver's defaults.
fn serial_settings(kind: DriverKind, transport: &TransportConfig) -> SerialSettings {
    let mut settings = kind.default_serial();
    if let TransportConfig::Serial {
        baud_rate,
        data_bits,
        parity,
        stop_bits,
        flow_control,
        ..
    } = transport
    {
        if let Some(v) = baud_rate {
            settings.baud_rate = *v;
        }
        if let Some(v) = data_bits {
            settings.data_bits = *v;
        }
        if let Some(v) = parity {
            settings.parity = *v;
        }
        if let Some(v) = stop_bits {
            settings.stop_bits = *v;
        }
        if let Some(v) = flow_control {
            settings.flow_control = *v;
        }
    }
    settings
}

/// Open the transport described by `definition`.
pub async fn open_adapter(
    definition: &InstrumentDefinition,
    timeouts: &TimeoutSettings,
) -> Result<Box<dyn Adapter>, AdapterError> {
    let adapter: Box<dyn Adapter> = match &definition.transport {
        TransportConfig::Tcp { host, port } => {
            Box::new(TcpAdapter::connect(host, *port, timeouts.connect()).await?)
        }
        TransportConfig::Serial { port, .. } => Box::new(SerialAdapter::open(
            port,
            serial_settings(definition.driver, &definition.transport),
        )?),
        TransportConfig::Visa { resource } => {
            Box::new(VisaAdapter::open(resource, timeouts.connect()).await?)
        }
        TransportConfig::Mock { replies } => Box::new(MockAdapter::from_replies(replies)),
    };
    Ok(adapter)
}

/// Session settings: the driver's defaults with configured overrides.
pub fn connection_settings(
    definition: &InstrumentDefinition,
    timeouts: &TimeoutSettings,
) -> ConnectionSettings {
    let mut settings = definition.driver.default_connection();
    if let Some(t) = &definition.write_terminator {
        settings.write_terminator = t.clone();
    }
    if let Some(t) = &definition.read_terminator {
        settings.read_terminator = t.clone();
    }
    settings.timeout = definition.reply_timeout(timeouts);
    settings
}

/// Open the transport and run the driver's connect sequence.
pub async fn open_instrument(
    definition: &InstrumentDefinition,
    timeouts: &TimeoutSettings,
) -> DriverResult<Box<dyn Driver>> {
    let adapter = open_adapter(definition, timeouts).await?;
    let connection = Connection::new(
        definition.id.clone(),
        adapter,
        connection_settings(definition, timeouts),
    );
    let config = &definition.config;

    let driver: Box<dyn Driver> = match definition.driver {
        DriverKind::AgilentN5183B => Box::new(AgilentN5183B::open(connection).await?),
        DriverKind::Cryomagnetics4G => Box::new(
            Cryomagnetics4G::open(connection, &config.cryomagnetics.clone().unwrap_or_default())
                .await?,
        ),
        DriverKind::RohdeSchwarzFsw => Box::new(RohdeSchwarzFsw::open(connection).await?),
        DriverKind::UnibaselSp927 => Box::new(UnibaselSp927::open(
            connection,
            &config.sp927.clone().unwrap_or_default(),
        )?),
        DriverKind::Yokogawa7651 => Box::new(Yokogawa7651::open(connection)),
    };

    info!(
        "Opened instrument '{}' ({} via {})",
        definition.id,
        definition.driver,
        driver.connection().adapter_info().await
    );
    Ok(driver)
}

/// Opened drivers, by instrument id.
#[derive(Default)]
pub struct InstrumentRegistry {
    drivers: BTreeMap<String, Box<dyn Driver>>,
}

impl InstrumentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every enabled instrument in `settings`.
    pub async fn open_all(settings: &Settings) -> DriverResult<Self> {
        let mut registry = Self::new();
        for definition in settings.enabled_instruments() {
            match open_instrument(definition, &settings.timeouts).await {
                Ok(driver) => registry.insert(driver),
                Err(e) => {
                    error!("Failed to open instrument '{}': {}", definition.id, e);
                    return Err(e);
                }
            }
        }
        Ok(registry)
    }

    /// Add a driver, replacing any with the same id.
    pub fn insert(&mut self, driver: Box<dyn Driver>) {
        self.drivers.insert(driver.id().to_string(), driver);
    }

    /// Driver for `id`, if opened.
    pub fn get(&self, id: &str) -> Option<&dyn Driver> {
        self.drivers.get(id).map(|d| d.as_ref())
    }

    /// Driver for `id`, or an error naming the known ids.
    pub fn require(&self, id: &str) -> DriverResult<&dyn Driver> {
        self.get(id).ok_or_else(|| {
            DriverError::InvalidArgument(format!(
                "No open instrument '{}'. Known: {}",
                id,
                self.ids().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Ids of the opened drivers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Number of opened drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no driver is open.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FlowControl;
    use crate::config::DriverSpecificConfig;

    fn definition(driver: DriverKind, transport: TransportConfig) -> InstrumentDefinition {
        InstrumentDefinition {
            id: "inst".to_string(),
            driver,
            enabled: true,
            transport,
            read_terminator: None,
            write_terminator: None,
            timeout_ms: None,
            config: DriverSpecificConfig::default(),
        }
    }

    #[test]
    fn test_driver_kind_names() {
        for kind in DriverKind::ALL {
            assert_eq!(kind.name().parse::<DriverKind>().unwrap(), kind);
        }
        assert_eq!(
            "Yokogawa_7651".parse::<DriverKind>().unwrap(),
            DriverKind::Yokogawa7651
        );
        assert!("keysight_sd_dig".parse::<DriverKind>().is_err());
        assert_eq!(
            serde_json::to_string(&DriverKind::AgilentN5183B).unwrap(),
            "\"agilent_n5183b\""
        );
    }

    #[test]
    fn test_serial_overrides_merge() {
        let transport = TransportConfig::Serial {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: Some(19200),
            data_bits: None,
            parity: None,
            stop_bits: None,
            flow_control: None,
        };
        let settings = serial_settings(DriverKind::UnibaselSp927, &transport);
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.flow_control, FlowControl::XonXoff);

        let settings = serial_settings(DriverKind::Cryomagnetics4G, &transport);
        assert_eq!(settings.flow_control, FlowControl::None);
    }

    #[test]
    fn test_connection_settings_overrides() {
        let mut def = definition(
            DriverKind::UnibaselSp927,
            TransportConfig::Mock {
                replies: BTreeMap::new(),
            },
        );
        let timeouts = TimeoutSettings::default();

        let settings = connection_settings(&def, &timeouts);
        assert_eq!(settings.write_terminator, "\n");
        assert_eq!(settings.read_terminator, "\r\n");

        def.read_terminator = Some("\n".to_string());
        def.timeout_ms = Some(250);
        let settings = connection_settings(&def, &timeouts);
        assert_eq!(settings.read_terminator, "\n");
        assert_eq!(settings.timeout, std::time::Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_open_mock_instrument() {
        let mut replies = BTreeMap::new();
        replies.insert(
            "*IDN?".to_string(),
            "Agilent Technologies,N5183B,MY1,1.0".to_string(),
        );
        replies.insert(":POW?".to_string(), "-20.0".to_string());
        let def = definition(DriverKind::AgilentN5183B, TransportConfig::Mock { replies });

        let driver = open_instrument(&def, &TimeoutSettings::default())
            .await
            .unwrap();
        assert_eq!(driver.model(), "N5183B");
        assert_eq!(
            driver.get("power").await.unwrap(),
            crate::parameter::ParamValue::Float(-20.0)
        );

        let mut registry = InstrumentRegistry::new();
        registry.insert(driver);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["inst"]);
        assert!(registry.require("inst").is_ok());
        assert!(registry.require("other").is_err());
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        // Nothing answers *IDN? on an empty mock.
        let def = definition(
            DriverKind::RohdeSchwarzFsw,
            TransportConfig::Mock {
                replies: BTreeMap::new(),
            },
        );
        let timeouts = TimeoutSettings {
            connect_ms: 100,
            reply_ms: 100,
        };
        assert!(matches!(
            open_instrument(&def, &timeouts).await,
            Err(DriverError::Adapter(AdapterError::Timeout { .. }))
        ));
    }
}
