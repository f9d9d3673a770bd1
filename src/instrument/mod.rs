//! Message-based instrument sessions.
//!
//! - [`Connection`] - terminators, timeouts and query pairing over an adapter
//! - [`IdnInfo`] - parsed `*IDN?` replies
//! - [`format`] - numeric formats the command parsers expect

pub mod connection;
pub mod format;
pub mod idn;

pub use connection::{connect_message, Connection, ConnectionSettings};
pub use idn::IdnInfo;
