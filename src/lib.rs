//! Drivers for laboratory instruments with ASCII command sets.
//!
//! Each driver exposes one instrument as named parameters and functions,
//! translating `get`/`set`/`call` into command strings sent over TCP, a serial
//! port or VISA, and parsing the replies back into typed values.
//!
//! - [`adapters`]: byte transports
//! - [`instrument`]: terminator handling and query pairing
//! - [`parameter`] and [`core`]: the parameter API and the [`core::Driver`] trait
//! - [`drivers`]: the instrument drivers
//! - [`config`], [`registry`]: building drivers from a TOML file
//!
//! # Example
//!
//! ```no_run
//! use lab_instruments::config::Settings;
//! use lab_instruments::parameter::ParamValue;
//! use lab_instruments::registry::InstrumentRegistry;
//! use lab_instruments::Driver;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::load()?;
//! let registry = InstrumentRegistry::open_all(&settings).await?;
//! let sg = registry.require("lo")?;
//! sg.set("frequency", ParamValue::Float(6.0e9)).await?;
//! sg.call("rf_on", &[]).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod parameter;
pub mod registry;

pub use crate::core::{Driver, Snapshot};
pub use crate::error::{AdapterError, DriverError, DriverResult};
pub use crate::parameter::ParamValue;
