//! VISA adapter for GPIB/USB/VXI instruments
//!
//! Wraps the `visa-rs` bindings. VISA calls block, so every transfer runs on
//! Tokio's blocking pool.
//!
//! Supports resource strings like:
//! - "GPIB0::5::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::inst0::INSTR" (VXI-11)

use async_trait::async_trait;
use std::time::Duration;

use super::Adapter;
use crate::error::AdapterError;

#[cfg(feature = "instrument_visa")]
use super::FrameBuffer;
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

#[cfg(feature = "instrument_visa")]
struct VisaSession {
    // Sessions close when their resource manager is dropped.
    _rm: DefaultRM,
    instr: Instrument,
}

/// VISA adapter for instrument communication
pub struct VisaAdapter {
    /// VISA resource string (e.g., "GPIB0::1::INSTR")
    resource: String,

    #[cfg(feature = "instrument_visa")]
    session: Arc<Mutex<VisaSession>>,

    #[cfg(feature = "instrument_visa")]
    buffer: FrameBuffer,
}

impl VisaAdapter {
    /// Open a VISA session on `resource`.
    #[cfg(feature = "instrument_visa")]
    pub async fn open(resource: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let resource_name = std::ffi::CString::new(resource).map_err(|_| {
            AdapterError::InvalidResource(format!("resource contains NUL byte: {}", resource))
        })?;
        let resource_for_log = resource.to_string();

        let session = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().map_err(|e| {
                AdapterError::ConnectionFailed(format!("Failed to create VISA resource manager: {}", e))
            })?;
            let instr = rm
                .open(&resource_name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| {
                    AdapterError::ConnectionFailed(format!(
                        "Failed to open VISA resource '{}': {}",
                        resource_for_log, e
                    ))
                })?;
            Ok::<_, AdapterError>(VisaSession { _rm: rm, instr })
        })
        .await
        .map_err(|e| AdapterError::ConnectionFailed(format!("VISA open task panicked: {}", e)))??;

        debug!("VISA resource '{}' opened", resource);
        Ok(Self {
            resource: resource.to_string(),
            session: Arc::new(Mutex::new(session)),
            buffer: FrameBuffer::default(),
        })
    }

    /// VISA support is compiled out.
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(resource: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let _ = (resource, timeout);
        Err(AdapterError::FeatureDisabled("instrument_visa"))
    }

    /// The resource string this adapter was opened with.
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

#[async_trait]
impl Adapter for VisaAdapter {
    fn adapter_type(&self) -> &str {
        "visa"
    }

    fn info(&self) -> String {
        format!("VisaAdapter({})", self.resource)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        #[cfg(feature = "instrument_visa")]
        {
            let session = self.session.clone();
            let data = data.to_vec();
            tokio::task::spawn_blocking(move || {
                use std::io::Write;
                let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
                guard.instr.write_all(&data)?;
                Ok::<_, AdapterError>(())
            })
            .await
            .map_err(|e| AdapterError::ConnectionFailed(format!("VISA write task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = data;
            Err(AdapterError::FeatureDisabled("instrument_visa"))
        }
    }

    async fn read_until(
        &mut self,
        delimiter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError> {
        #[cfg(feature = "instrument_visa")]
        {
            if delimiter.is_empty() {
                return Err(AdapterError::InvalidResource(
                    "read delimiter must not be empty".to_string(),
                ));
            }
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                if let Some(frame) = self.buffer.take_frame(delimiter) {
                    return Ok(frame);
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(AdapterError::Timeout { after: timeout });
                }

                let session = self.session.clone();
                let chunk = tokio::task::spawn_blocking(move || {
                    use std::io::Read;
                    let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
                    let mut chunk = vec![0u8; 1024];
                    let n = guard.instr.read(&mut chunk)?;
                    chunk.truncate(n);
                    Ok::<_, AdapterError>(chunk)
                })
                .await
                .map_err(|e| {
                    AdapterError::ConnectionFailed(format!("VISA read task panicked: {}", e))
                })?;

                match chunk {
                    Ok(bytes) if bytes.is_empty() => return Err(AdapterError::UnexpectedEof),
                    Ok(bytes) => self.buffer.extend(&bytes),
                    Err(AdapterError::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                        return Err(AdapterError::Timeout { after: timeout })
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = (delimiter, timeout);
            Err(AdapterError::FeatureDisabled("instrument_visa"))
        }
    }

    async fn clear(&mut self) -> Result<(), AdapterError> {
        #[cfg(feature = "instrument_visa")]
        self.buffer.clear();
        Ok(())
    }
}
