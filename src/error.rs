//! Custom error types for the driver library.
//!
//! Errors are split by layer, each defined with `thiserror`:
//!
//! - **`AdapterError`**: transport failures (socket, serial port, VISA session).
//!   These never know anything about command sets.
//! - **`DriverError`**: everything above the transport. A malformed reply, a value
//!   outside a parameter's validator, an unknown parameter name. Wraps
//!   `AdapterError` via `#[from]` so driver code can use `?` on adapter calls.
//! - **`ConfigError`**: lives in [`crate::config`] and converts into `DriverError`.
//!
//! The CLI binary wraps these in `anyhow` with context; the library itself never
//! returns `anyhow::Error`.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results returned by drivers.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors raised by a transport adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The transport could not be opened.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No complete reply arrived before the deadline.
    #[error("Read timeout after {after:?}")]
    Timeout {
        /// How long the adapter waited.
        after: Duration,
    },

    /// The peer closed the stream before the delimiter arrived.
    #[error("Unexpected EOF while waiting for reply")]
    UnexpectedEof,

    /// Wrapped I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The resource string or framing argument is malformed.
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// The transport was compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureDisabled(&'static str),

    /// A scripted failure from the mock adapter.
    #[error("Injected failure")]
    Injected,
}

/// Errors raised by drivers and the parameter layer.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Transport-level failure.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Configuration could not be loaded or is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No parameter with this name on the instrument.
    #[error("Unknown parameter '{name}' on instrument '{instrument}'")]
    UnknownParameter {
        /// Instrument id.
        instrument: String,
        /// Requested parameter.
        name: String,
    },

    /// No function with this name on the instrument.
    #[error("Unknown function '{name}' on instrument '{instrument}'")]
    UnknownFunction {
        /// Instrument id.
        instrument: String,
        /// Requested function.
        name: String,
    },

    /// Set was called on a get-only parameter.
    #[error("Parameter '{0}' is read-only")]
    ReadOnly(String),

    /// Get was called on a set-only parameter.
    #[error("Parameter '{0}' cannot be read back")]
    WriteOnly(String),

    /// A value was rejected before anything was sent to the instrument.
    #[error("Invalid value for '{parameter}': {reason}")]
    Validation {
        /// Parameter or argument name.
        parameter: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The instrument replied with something the driver could not interpret.
    #[error("Failed to parse reply '{response}' to '{command}': {reason}")]
    Parse {
        /// Command that produced the reply.
        command: String,
        /// Reply text (terminator stripped).
        response: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Bad arguments to a driver function.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A polling loop gave up before the setpoint was reached.
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// How long the loop ran.
        after: Duration,
    },
}

impl DriverError {
    /// Build a [`DriverError::Parse`] from a command, its reply and a diagnostic.
    pub fn parse(command: &str, response: &str, reason: impl ToString) -> Self {
        Self::Parse {
            command: command.to_string(),
            response: response.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`DriverError::UnknownParameter`].
    pub fn unknown_parameter(instrument: &str, name: &str) -> Self {
        Self::UnknownParameter {
            instrument: instrument.to_string(),
            name: name.to_string(),
        }
    }

    /// Build a [`DriverError::UnknownFunction`].
    pub fn unknown_function(instrument: &str, name: &str) -> Self {
        Self::UnknownFunction {
            instrument: instrument.to_string(),
            name: name.to_string(),
        }
    }

    /// Build a [`DriverError::Validation`].
    pub fn validation(parameter: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}
