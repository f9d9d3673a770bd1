//! Core driver trait and snapshot type.
//!
//! # Architecture Overview
//!
//! A driver turns named parameter access into instrument commands:
//!
//! ```text
//! get("power") -> Driver::read_parameter -> Connection::ask(":POW?") -> Adapter
//! set("power", -10.0) -> ParameterInfo::check_set -> Driver::write_parameter
//! ```
//!
//! Implementations provide the metadata ([`Driver::parameters`],
//! [`Driver::functions`]) and the three raw hooks
//! ([`Driver::read_parameter`], [`Driver::write_parameter`], [`Driver::invoke`]).
//! Lookup, validation, value mapping and arity checks happen once, in the
//! provided `get`/`set`/`call` methods.
//!
//! # Thread Safety
//!
//! Drivers are `Send + Sync`; all instrument I/O goes through the driver's
//! [`Connection`], which serialises requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::instrument::Connection;
use crate::parameter::{FunctionInfo, ParamValue, ParameterInfo};

/// Values of every readable parameter on one instrument at one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Instrument id
    pub instrument: String,
    /// Model reported by the instrument
    pub model: String,
    /// When the snapshot was started
    pub taken_at: DateTime<Utc>,
    /// Parameter values by name
    pub values: BTreeMap<String, ParamValue>,
    /// Parameters that could not be read, with the error text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// An instrument exposed as named parameters and functions.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Instrument id from configuration.
    fn id(&self) -> &str;

    /// Model string, usually from `*IDN?`.
    fn model(&self) -> &str;

    /// The session used for all I/O.
    fn connection(&self) -> &Connection;

    /// All parameters, in display order.
    fn parameters(&self) -> &[ParameterInfo];

    /// All callable functions.
    fn functions(&self) -> &[FunctionInfo];

    /// Read a parameter's raw value. Called only for known, gettable names.
    async fn read_parameter(&self, name: &str) -> DriverResult<ParamValue>;

    /// Send a validated raw value. Called only for known, settable names.
    async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()>;

    /// Run a function. Called only for known names with the right arity.
    async fn invoke(&self, name: &str, args: &[ParamValue]) -> DriverResult<Option<ParamValue>>;

    /// Look up a parameter by name.
    fn parameter(&self, name: &str) -> DriverResult<&ParameterInfo> {
        self.parameters()
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DriverError::unknown_parameter(self.id(), name))
    }

    /// Look up a function by name.
    fn function(&self, name: &str) -> DriverResult<&FunctionInfo> {
        self.functions()
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| DriverError::unknown_function(self.id(), name))
    }

    /// Read a parameter, translating mapped values back to their labels.
    async fn get(&self, name: &str) -> DriverResult<ParamValue> {
        let info = self.parameter(name)?;
        if !info.gettable {
            return Err(DriverError::WriteOnly(name.to_string()));
        }
        let raw = self.read_parameter(name).await?;
        Ok(info.present(raw))
    }

    /// Validate and set a parameter.
    async fn set(&self, name: &str, value: ParamValue) -> DriverResult<()> {
        let raw = self.parameter(name)?.check_set(value)?;
        debug!("[{}] set {} = {}", self.id(), name, raw);
        self.write_parameter(name, raw).await
    }

    /// Call a function after checking its arity.
    async fn call(&self, name: &str, args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
        self.function(name)?.check_arity(args)?;
        self.invoke(name, args).await
    }

    /// Read every gettable parameter. Failures are recorded per parameter
    /// rather than aborting the snapshot.
    async fn snapshot(&self) -> DriverResult<Snapshot> {
        let mut snapshot = Snapshot {
            instrument: self.id().to_string(),
            model: self.model().to_string(),
            taken_at: Utc::now(),
            values: BTreeMap::new(),
            errors: BTreeMap::new(),
        };

        for info in self.parameters().iter().filter(|p| p.gettable) {
            match self.get(&info.name).await {
                Ok(value) => {
                    snapshot.values.insert(info.name.clone(), value);
                }
                Err(e) => {
                    warn!("[{}] snapshot: failed to read {}: {}", self.id(), info.name, e);
                    snapshot.errors.insert(info.name.clone(), e.to_string());
                }
            }
        }
        Ok(snapshot)
    }
}

/// Required numeric argument `index` of a function call.
pub fn float_arg(func: &str, args: &[ParamValue], index: usize) -> DriverResult<f64> {
    args.get(index)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| {
            DriverError::InvalidArgument(format!("{}: argument {} must be a number", func, index + 1))
        })
}

/// Required integer argument `index` of a function call.
pub fn int_arg(func: &str, args: &[ParamValue], index: usize) -> DriverResult<i64> {
    args.get(index)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| {
            DriverError::InvalidArgument(format!("{}: argument {} must be an integer", func, index + 1))
        })
}

/// Required boolean argument `index` of a function call.
pub fn bool_arg(func: &str, args: &[ParamValue], index: usize) -> DriverResult<bool> {
    args.get(index)
        .and_then(ParamValue::as_bool)
        .ok_or_else(|| {
            DriverError::InvalidArgument(format!("{}: argument {} must be a boolean", func, index + 1))
        })
}

/// Required text argument `index` of a function call. Non-text values are
/// rendered with `Display`.
pub fn text_arg(func: &str, args: &[ParamValue], index: usize) -> DriverResult<String> {
    args.get(index).map(ToString::to_string).ok_or_else(|| {
        DriverError::InvalidArgument(format!("{}: missing argument {}", func, index + 1))
    })
}

/// Parse a float reply, mapping failures to [`DriverError::Parse`].
pub fn parse_float(command: &str, reply: &str) -> DriverResult<f64> {
    reply
        .trim()
        .parse::<f64>()
        .map_err(|e| DriverError::parse(command, reply, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::instrument::ConnectionSettings;
    use crate::parameter::{ValueMapping, Validator};

    struct Dummy {
        connection: Connection,
        parameters: Vec<ParameterInfo>,
        functions: Vec<FunctionInfo>,
    }

    impl Dummy {
        fn new(mock: &MockAdapter) -> Self {
            Self {
                connection: Connection::new(
                    "dummy",
                    Box::new(mock.clone()),
                    ConnectionSettings::default(),
                ),
                parameters: vec![
                    ParameterInfo::new("level").with_validator(Validator::numbers(Some(0.0), Some(1.0))),
                    ParameterInfo::new("output").with_mapping(ValueMapping::on_off()),
                    ParameterInfo::new("reading").read_only(),
                    ParameterInfo::new("trigger").write_only(),
                ],
                functions: vec![FunctionInfo::new("beep", "").with_args(&["count"])],
            }
        }
    }

    #[async_trait]
    impl Driver for Dummy {
        fn id(&self) -> &str {
            "dummy"
        }
        fn model(&self) -> &str {
            "D1"
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
            let reply = self.connection.ask(&format!("{}?", name)).await?;
            Ok(ParamValue::Float(parse_float(name, &reply)?))
        }
        async fn write_parameter(&self, name: &str, value: ParamValue) -> DriverResult<()> {
            self.connection.write(&format!("{} {}", name, value)).await
        }
        async fn invoke(&self, _name: &str, args: &[ParamValue]) -> DriverResult<Option<ParamValue>> {
            Ok(Some(ParamValue::Int(int_arg("beep", args, 0)?)))
        }
    }

    #[tokio::test]
    async fn test_get_set_dispatch() {
        let mock = MockAdapter::new().with_reply("output?", "1");
        let dummy = Dummy::new(&mock);

        dummy.set("level", ParamValue::Float(0.5)).await.unwrap();
        dummy.set("output", ParamValue::from("off")).await.unwrap();
        assert_eq!(mock.written(), vec!["level 0.5", "output 0"]);

        assert_eq!(dummy.get("output").await.unwrap(), ParamValue::from("on"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let mock = MockAdapter::new();
        let dummy = Dummy::new(&mock);

        assert!(matches!(
            dummy.get("nope").await,
            Err(DriverError::UnknownParameter { .. })
        ));
        assert!(matches!(
            dummy.set("reading", ParamValue::Float(1.0)).await,
            Err(DriverError::ReadOnly(_))
        ));
        assert!(matches!(
            dummy.get("trigger").await,
            Err(DriverError::WriteOnly(_))
        ));
        assert!(matches!(
            dummy.set("level", ParamValue::Float(2.0)).await,
            Err(DriverError::Validation { .. })
        ));
        assert!(matches!(
            dummy.call("beep", &[]).await,
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(matches!(
            dummy.call("explode", &[]).await,
            Err(DriverError::UnknownFunction { .. })
        ));
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_call() {
        let dummy = Dummy::new(&MockAdapter::new());
        let result = dummy.call("beep", &[ParamValue::Int(3)]).await.unwrap();
        assert_eq!(result, Some(ParamValue::Int(3)));
    }

    #[tokio::test]
    async fn test_snapshot_records_failures() {
        let mock = MockAdapter::new()
            .with_reply("level?", "0.25")
            .with_reply("output?", "0")
            .with_reply("reading?", "garbage");
        let dummy = Dummy::new(&mock);

        let snapshot = dummy.snapshot().await.unwrap();
        assert_eq!(snapshot.instrument, "dummy");
        assert_eq!(snapshot.values["level"], ParamValue::Float(0.25));
        assert_eq!(snapshot.values["output"], ParamValue::from("off"));
        assert!(snapshot.errors.contains_key("reading"));
        assert!(!snapshot.values.contains_key("trigger"));
    }

    #[test]
    fn test_arg_helpers() {
        let args = [ParamValue::from("Z"), ParamValue::Bool(true), ParamValue::Int(2)];
        assert_eq!(text_arg("f", &args, 0).unwrap(), "Z");
        assert!(bool_arg("f", &args, 1).unwrap());
        assert_eq!(float_arg("f", &args, 2).unwrap(), 2.0);
        assert!(float_arg("f", &args, 0).is_err());
        assert!(text_arg("f", &args, 5).is_err());
    }
}
