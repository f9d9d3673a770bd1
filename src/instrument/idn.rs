//! `*IDN?` identity replies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parsed reply to the IEEE 488.2 identification query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdnInfo {
    /// Manufacturer
    pub vendor: String,
    /// Model number
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware revision
    pub firmware: String,
}

impl IdnInfo {
    /// Split a comma separated `*IDN?` reply. Missing fields are left empty and
    /// anything past the fourth comma stays in `firmware`.
    pub fn parse(reply: &str) -> Self {
        let mut parts = reply.trim().splitn(4, ',').map(str::trim);
        let mut next = || parts.next().unwrap_or_default().to_string();
        Self {
            vendor: next(),
            model: next(),
            serial: next(),
            firmware: next(),
        }
    }

    /// Model family: the part of the model before the first `-` (`FSW-26` → `FSW`).
    pub fn model_family(&self) -> &str {
        self.model.split('-').next().unwrap_or_default()
    }
}

impl fmt::Display for IdnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (serial:{}, firmware:{})",
            self.vendor, self.model, self.serial, self.firmware
        )
    }
}
