//! Hardware adapter implementations
//!
//! An [`Adapter`] moves raw bytes to and from one instrument. It knows nothing
//! about command sets; terminators are handed in by the caller. Implementations:
//!
//! - [`TcpAdapter`] - raw socket (LAN instruments, usually port 5025)
//! - [`SerialAdapter`] - RS-232 / USB-serial via `tokio-serial`
//! - [`VisaAdapter`] - GPIB/USB/VXI through an installed VISA library
//! - [`MockAdapter`] - scripted replies for tests and dry runs

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::error::AdapterError;

pub mod mock_adapter;
pub mod serial_adapter;
pub mod tcp_adapter;
pub mod visa_adapter;

pub use mock_adapter::MockAdapter;
pub use serial_adapter::{FlowControl, Parity, SerialAdapter, SerialSettings, StopBits};
pub use tcp_adapter::TcpAdapter;
pub use visa_adapter::VisaAdapter;

/// Generic async adapter trait for byte-level instrument I/O.
#[async_trait]
pub trait Adapter: Send {
    /// Short transport name ("tcp", "serial", "visa", "mock").
    fn adapter_type(&self) -> &str;

    /// Human readable description including the address.
    fn info(&self) -> String;

    /// Write bytes verbatim. The caller appends any terminator.
    async fn write(&mut self, data: &[u8]) -> Result<(), AdapterError>;

    /// Read until `delimiter` is seen, returning the bytes before it.
    ///
    /// Bytes received after the delimiter are kept for the next call.
    async fn read_until(
        &mut self,
        delimiter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError>;

    /// Drop buffered input and anything already waiting on the transport.
    async fn clear(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// How long the line must stay silent before a drain is considered complete.
pub const DRAIN_QUIET: Duration = Duration::from_millis(10);

/// Accumulates stream bytes and splits them on a delimiter.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Remove and return the first complete frame, delimiter excluded.
    pub(crate) fn take_frame(&mut self, delimiter: &[u8]) -> Option<Vec<u8>> {
        let pos = self
            .pending
            .windows(delimiter.len())
            .position(|window| window == delimiter)?;
        let mut frame: Vec<u8> = self.pending.drain(..pos + delimiter.len()).collect();
        frame.truncate(pos);
        Some(frame)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Read from `reader` into `buffer` until a delimited frame is available.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
    delimiter: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, AdapterError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if delimiter.is_empty() {
        return Err(AdapterError::InvalidResource(
            "read delimiter must not be empty".to_string(),
        ));
    }

    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; 256];

    loop {
        if let Some(frame) = buffer.take_frame(delimiter) {
            return Ok(frame);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AdapterError::Timeout { after: timeout });
        }

        match tokio::time::timeout(remaining, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => return Err(AdapterError::UnexpectedEof),
            Ok(Ok(n)) => buffer.extend(&chunk[..n]),
            // Serial ports report their own short read timeout; keep waiting.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Ok(Err(e)) => return Err(AdapterError::Io(e)),
            Err(_) => return Err(AdapterError::Timeout { after: timeout }),
        }
    }
}

/// Discard `buffer` and read from `reader` until it has been silent for
/// `quiet`. Returns the number of bytes thrown away.
pub(crate) async fn drain_input<R>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
    quiet: Duration,
) -> Result<usize, AdapterError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut discarded = buffer.pending.len();
    buffer.clear();
    let mut chunk = [0u8; 256];

    loop {
        match tokio::time::timeout(quiet, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => return Err(AdapterError::UnexpectedEof),
            Ok(Ok(n)) => discarded += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(discarded),
            Ok(Err(e)) => return Err(AdapterError::Io(e)),
            Err(_) => return Ok(discarded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_frame_buffer_keeps_remainder() {
        let mut buffer = FrameBuffer::default();
        buffer.extend(b"1.5\r\n2.5\r\n3");
        assert_eq!(buffer.take_frame(b"\r\n").as_deref(), Some(&b"1.5"[..]));
        assert_eq!(buffer.take_frame(b"\r\n").as_deref(), Some(&b"2.5"[..]));
        assert_eq!(buffer.take_frame(b"\r\n"), None);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_frame_buffer_empty_frame() {
        let mut buffer = FrameBuffer::default();
        buffer.extend(b"\n");
        assert_eq!(buffer.take_frame(b"\n"), Some(Vec::new()));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_across_chunks() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"+1.0000").await.unwrap();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"E+09\n").await.unwrap();
            server
        });

        let mut buffer = FrameBuffer::default();
        let frame = read_frame(&mut client, &mut buffer, b"\n", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(frame, b"+1.0000E+09");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_frame_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let mut buffer = FrameBuffer::default();
        let err = read_frame(&mut client, &mut buffer, b"\n", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_read_frame_reports_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let mut buffer = FrameBuffer::default();
        let err = read_frame(&mut client, &mut buffer, b"\n", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_drain_discards_buffered_and_pending_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut buffer = FrameBuffer::default();
        buffer.extend(b"stale\n");
        server.write_all(b"1.0E+09\n").await.unwrap();

        let discarded = drain_input(&mut client, &mut buffer, DRAIN_QUIET)
            .await
            .unwrap();
        assert_eq!(discarded, 14);
        assert!(buffer.is_empty());

        server.write_all(b"-10.0\n").await.unwrap();
        let frame = read_frame(&mut client, &mut buffer, b"\n", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(frame, b"-10.0");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_empty_delimiter() {
        let (mut client, _server) = tokio::io::duplex(64);
        let mut buffer = FrameBuffer::default();
        let err = read_frame(&mut client, &mut buffer, b"", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidResource(_)));
    }
}
