//! Raw-socket adapter for LAN instruments.
//!
//! Most LAN instruments (signal generators, spectrum analyzers) accept SCPI on a
//! plain TCP socket, conventionally port 5025. No VISA installation is needed.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{drain_input, read_frame, Adapter, FrameBuffer, DRAIN_QUIET};
use crate::error::AdapterError;

/// TCP socket adapter
pub struct TcpAdapter {
    address: String,
    stream: TcpStream,
    buffer: FrameBuffer,
}

impl TcpAdapter {
    /// Open a socket to `host:port`, giving up after `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, AdapterError> {
        let address = format!("{}:{}", host, port);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                AdapterError::ConnectionFailed(format!(
                    "timed out after {:?} connecting to {}",
                    timeout, address
                ))
            })?
            .map_err(|e| AdapterError::ConnectionFailed(format!("{}: {}", address, e)))?;

        // Commands are short and latency bound.
        stream.set_nodelay(true)?;

        debug!("TCP socket to '{}' opened", address);
        Ok(Self {
            address,
            stream,
            buffer: FrameBuffer::default(),
        })
    }

    /// Remote address in `host:port` form.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Adapter for TcpAdapter {
    fn adapter_type(&self) -> &str {
        "tcp"
    }

    fn info(&self) -> String {
        format!("TcpAdapter({})", self.address)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_until(
        &mut self,
        delimiter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError> {
        read_frame(&mut self.stream, &mut self.buffer, delimiter, timeout).await
    }

    async fn clear(&mut self) -> Result<(), AdapterError> {
        let discarded = drain_input(&mut self.stream, &mut self.buffer, DRAIN_QUIET).await?;
        if discarded > 0 {
            warn!("Discarded {} unread byte(s) from {}", discarded, self.address);
        }
        Ok(())
    }
}
