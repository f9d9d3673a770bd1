//! Message-based session on top of an [`Adapter`].
//!
//! A [`Connection`] owns one adapter and adds the pieces every ASCII command set
//! needs: write/read terminators, a reply timeout, and query pairing. The adapter
//! lock is held across write+read in [`Connection::ask`] so a reply can never be
//! handed to the wrong caller.
//!
//! A reply that misses its timeout may still arrive later. After a timeout the
//! connection is marked out of sync, and the next command first clears the
//! adapter so the late reply is not taken as the answer to a new query.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::idn::IdnInfo;
use crate::adapters::Adapter;
use crate::error::{AdapterError, DriverError, DriverResult};

/// Terminators and timeout for a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Appended to every command.
    pub write_terminator: String,
    /// Marks the end of a reply.
    pub read_terminator: String,
    /// Reply timeout.
    pub timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            write_terminator: "\n".to_string(),
            read_terminator: "\n".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionSettings {
    /// Same terminator for both directions.
    pub fn with_terminator(terminator: &str) -> Self {
        Self {
            write_terminator: terminator.to_string(),
            read_terminator: terminator.to_string(),
            ..Self::default()
        }
    }
}

/// A message-based session with one instrument.
pub struct Connection {
    id: String,
    adapter: Mutex<Box<dyn Adapter>>,
    settings: ConnectionSettings,
    // Set when a query timed out; its reply may still be in flight.
    out_of_sync: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Connection {
    /// Wrap `adapter` for the instrument named `id`.
    pub fn new(id: impl Into<String>, adapter: Box<dyn Adapter>, settings: ConnectionSettings) -> Self {
        Self {
            id: id.into(),
            adapter: Mutex::new(adapter),
            settings,
            out_of_sync: AtomicBool::new(false),
        }
    }

    /// Instrument id used in log lines and errors.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Terminators and timeout in effect.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Send a command that produces no reply.
    pub async fn write(&self, cmd: &str) -> DriverResult<()> {
        let mut adapter = self.adapter.lock().await;
        self.send(adapter.as_mut(), cmd).await
    }

    /// Send a query and return the reply with the terminator and surrounding
    /// whitespace removed.
    pub async fn ask(&self, cmd: &str) -> DriverResult<String> {
        Ok(self.ask_raw(cmd).await?.trim().to_string())
    }

    /// Send a query and return the reply with only the terminator removed.
    pub async fn ask_raw(&self, cmd: &str) -> DriverResult<String> {
        let mut adapter = self.adapter.lock().await;
        self.send(adapter.as_mut(), cmd).await?;

        let bytes = match adapter
            .read_until(self.settings.read_terminator.as_bytes(), self.settings.timeout)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                if matches!(e, AdapterError::Timeout { .. }) {
                    self.out_of_sync.store(true, Ordering::SeqCst);
                }
                return Err(e.into());
            }
        };
        let reply = String::from_utf8(bytes).map_err(|e| {
            DriverError::parse(cmd, &String::from_utf8_lossy(e.as_bytes()), "reply is not valid UTF-8")
        })?;

        debug!("[{}] {} -> {}", self.id, cmd, reply.trim_end());
        Ok(reply)
    }

    /// Discard any unread input on the transport.
    pub async fn clear(&self) -> DriverResult<()> {
        self.adapter.lock().await.clear().await?;
        self.out_of_sync.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether a reply timed out and the transport has not been cleared since.
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync.load(Ordering::SeqCst)
    }

    /// Query `*IDN?`.
    pub async fn identify(&self) -> DriverResult<IdnInfo> {
        Ok(IdnInfo::parse(&self.ask("*IDN?").await?))
    }

    /// Short description of the transport behind this connection.
    pub async fn adapter_info(&self) -> String {
        self.adapter.lock().await.info()
    }

    async fn send(&self, adapter: &mut dyn Adapter, cmd: &str) -> DriverResult<()> {
        if self.out_of_sync.load(Ordering::SeqCst) {
            warn!("[{}] clearing input left over from a timed-out reply", self.id);
            adapter.clear().await?;
            self.out_of_sync.store(false, Ordering::SeqCst);
        }

        let mut payload = String::with_capacity(cmd.len() + self.settings.write_terminator.len());
        payload.push_str(cmd);
        payload.push_str(&self.settings.write_terminator);

        adapter.write(payload.as_bytes()).await?;
        debug!("[{}] sent: {}", self.id, cmd);
        Ok(())
    }
}

/// Log the standard "Connected to" line for a freshly opened instrument.
pub fn connect_message(id: &str, idn: &IdnInfo, started: Instant) {
    info!(
        instrument = id,
        "Connected to: {} in {:.2}s",
        idn,
        started.elapsed().as_secs_f64()
    );
}
