//! Named instrument parameters and functions.
//!
//! Every driver describes itself as a list of [`ParameterInfo`] and
//! [`FunctionInfo`] entries. Values cross the driver boundary as [`ParamValue`],
//! a small dynamically typed value that serializes to plain JSON scalars.
//!
//! A parameter may carry
//! - a [`Validator`], checked before anything is sent to the instrument
//! - a [`ValueMapping`] between user-facing labels and the raw values the
//!   instrument speaks (`off` ↔ `0`)
//!
//! # Example
//!
//! ```
//! use lab_instruments::parameter::{ParamValue, ParameterInfo, Validator};
//!
//! let power = ParameterInfo::new("power")
//!     .with_label("Power")
//!     .with_unit("dBm")
//!     .with_validator(Validator::numbers(Some(-130.0), Some(20.0)));
//!
//! assert!(power.check_set(ParamValue::Float(-10.0)).is_ok());
//! assert!(power.check_set(ParamValue::Float(30.0)).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DriverError, DriverResult};

// =============================================================================
// ParamValue
// =============================================================================

/// A parameter value as seen by callers of a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Free text or an enumerated label
    Text(String),
}

impl ParamValue {
    /// Parse a command-line argument: booleans, then integers, then floats,
    /// and anything else as text.
    pub fn parse_cli(input: &str) -> Self {
        let input = input.trim();
        match input.to_ascii_lowercase().as_str() {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = input.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = input.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Text(input.to_string())
    }

    /// Numeric view. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer view. Floats are accepted only when they hold an integral value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Boolean view. Accepts `0`/`1` and the words on/off/true/false.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::Text(s) => match s.to_ascii_lowercase().as_str() {
                "on" | "true" => Some(true),
                "off" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Loose equality used for enum and mapping lookups: numbers compare by
    /// value, text compares case-insensitively.
    pub fn matches(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a.eq_ignore_ascii_case(b),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Constraint checked before a value is sent to the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// Any number within the (inclusive, optionally open) bounds.
    Numbers {
        /// Lower bound
        min: Option<f64>,
        /// Upper bound
        max: Option<f64>,
    },
    /// An integral number within the bounds.
    Ints {
        /// Lower bound
        min: Option<i64>,
        /// Upper bound
        max: Option<i64>,
    },
    /// One of a fixed set of values.
    Enum {
        /// Accepted values
        values: Vec<ParamValue>,
    },
    /// Any text.
    Strings,
}

impl Validator {
    /// Shorthand for [`Validator::Numbers`].
    pub fn numbers(min: Option<f64>, max: Option<f64>) -> Self {
        Self::Numbers { min, max }
    }

    /// Shorthand for [`Validator::Ints`].
    pub fn ints(min: Option<i64>, max: Option<i64>) -> Self {
        Self::Ints { min, max }
    }

    /// Enum of text labels.
    pub fn labels(labels: &[&str]) -> Self {
        Self::Enum {
            values: labels.iter().map(|l| ParamValue::from(*l)).collect(),
        }
    }

    /// Check `value`, returning a human readable reason on rejection.
    pub fn check(&self, value: &ParamValue) -> Result<(), String> {
        match self {
            Self::Numbers { min, max } => {
                let x = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {} '{}'", value.kind(), value))?;
                if !x.is_finite() {
                    return Err(format!("{} is not a finite number", x));
                }
                check_bounds(x, *min, *max)
            }
            Self::Ints { min, max } => {
                let i = value
                    .as_i64()
                    .ok_or_else(|| format!("expected an integer, got {} '{}'", value.kind(), value))?;
                check_bounds(i, *min, *max)
            }
            Self::Enum { values } => {
                if values.iter().any(|v| v.matches(value)) {
                    Ok(())
                } else {
                    let accepted: Vec<String> = values.iter().map(ToString::to_string).collect();
                    Err(format!(
                        "'{}' is not one of: {}",
                        value,
                        accepted.join(", ")
                    ))
                }
            }
            Self::Strings => match value {
                ParamValue::Text(_) => Ok(()),
                other => Err(format!("expected text, got {} '{}'", other.kind(), other)),
            },
        }
    }
}

fn check_bounds<T: PartialOrd + fmt::Display + Copy>(
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), String> {
    match (min, max) {
        (Some(lo), _) if value < lo => Err(format!("{} is below the minimum {}", value, lo)),
        (_, Some(hi)) if value > hi => Err(format!("{} is above the maximum {}", value, hi)),
        _ => Ok(()),
    }
}

// =============================================================================
// ValueMapping
// =============================================================================

/// Two-way table between user labels and raw instrument values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueMapping {
    entries: Vec<(String, ParamValue)>,
}

impl ValueMapping {
    /// Build from `(label, raw)` pairs.
    pub fn new<L, V>(entries: impl IntoIterator<Item = (L, V)>) -> Self
    where
        L: Into<String>,
        V: Into<ParamValue>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(label, raw)| (label.into(), raw.into()))
                .collect(),
        }
    }

    /// The common `off`↔0 / `on`↔1 mapping.
    pub fn on_off() -> Self {
        Self::new([("off", 0i64), ("on", 1i64)])
    }

    /// Labels in declaration order.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Raw value for a user value. Labels match case-insensitively; booleans
    /// go through their on/off label; a raw value passes through unchanged.
    pub fn to_raw(&self, value: &ParamValue) -> Option<ParamValue> {
        let value = match value {
            ParamValue::Bool(true) => ParamValue::from("on"),
            ParamValue::Bool(false) => ParamValue::from("off"),
            other => other.clone(),
        };
        if let ParamValue::Text(text) = &value {
            if let Some((_, raw)) = self
                .entries
                .iter()
                .find(|(label, _)| label.eq_ignore_ascii_case(text))
            {
                return Some(raw.clone());
            }
        }
        self.entries
            .iter()
            .find(|(_, raw)| raw.matches(&value))
            .map(|(_, raw)| raw.clone())
    }

    /// Label for a raw value read from the instrument.
    pub fn to_label(&self, raw: &ParamValue) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, r)| r.matches(raw))
            .map(|(label, _)| label.as_str())
    }
}

// =============================================================================
// ParameterInfo / FunctionInfo
// =============================================================================

/// Description of one named parameter on an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Name used with `get`/`set`.
    pub name: String,
    /// Human readable label.
    pub label: String,
    /// Physical unit, empty when dimensionless.
    pub unit: String,
    /// Constraint applied to values passed to `set`.
    pub validator: Option<Validator>,
    /// Label ↔ raw value table.
    pub mapping: Option<ValueMapping>,
    /// Whether `get` is supported.
    pub gettable: bool,
    /// Whether `set` is supported.
    pub settable: bool,
    /// Free-form documentation.
    pub docstring: String,
}

impl ParameterInfo {
    /// A gettable and settable parameter whose label is its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            unit: String::new(),
            validator: None,
            mapping: None,
            gettable: true,
            settable: true,
            docstring: String::new(),
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Attach a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Attach a value mapping.
    pub fn with_mapping(mut self, mapping: ValueMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Attach documentation.
    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = docstring.into();
        self
    }

    /// Make the parameter get-only.
    pub fn read_only(mut self) -> Self {
        self.settable = false;
        self
    }

    /// Make the parameter set-only.
    pub fn write_only(mut self) -> Self {
        self.gettable = false;
        self
    }

    /// Validate a value for `set` and return what the setter should send:
    /// the raw value when a mapping exists, otherwise the value itself.
    pub fn check_set(&self, value: ParamValue) -> DriverResult<ParamValue> {
        if !self.settable {
            return Err(DriverError::ReadOnly(self.name.clone()));
        }
        if let Some(validator) = &self.validator {
            validator
                .check(&value)
                .map_err(|reason| DriverError::validation(&self.name, reason))?;
        }
        match &self.mapping {
            Some(mapping) => mapping.to_raw(&value).ok_or_else(|| {
                DriverError::validation(
                    &self.name,
                    format!("'{}' is not one of: {}", value, mapping.labels().join(", ")),
                )
            }),
            None => Ok(value),
        }
    }

    /// Translate a raw reading into what `get` returns.
    pub fn present(&self, raw: ParamValue) -> ParamValue {
        match &self.mapping {
            Some(mapping) => mapping
                .to_label(&raw)
                .map(ParamValue::from)
                .unwrap_or(raw),
            None => raw,
        }
    }
}

/// Description of one callable function on an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Name used with `call`.
    pub name: String,
    /// Argument names, in order.
    pub args: Vec<String>,
    /// Free-form documentation.
    pub docstring: String,
}

impl FunctionInfo {
    /// A function taking no arguments.
    pub fn new(name: impl Into<String>, docstring: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            docstring: docstring.into(),
        }
    }

    /// Declare the argument names.
    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Reject a call whose argument count does not match.
    pub fn check_arity(&self, args: &[ParamValue]) -> DriverResult<()> {
        if args.len() == self.args.len() {
            Ok(())
        } else {
            Err(DriverError::InvalidArgument(format!(
                "{}({}) takes {} argument(s), got {}",
                self.name,
                self.args.join(", "),
                self.args.len(),
                args.len()
            )))
        }
    }
}
