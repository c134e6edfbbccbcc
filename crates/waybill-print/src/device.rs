// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print device abstraction and the raw TCP (JetDirect, port 9100) device.
//
// The raw device opens a socket per page and streams the page bytes. There is
// no job tracking or feedback, so completion means the printer accepted every
// byte and the connection closed cleanly.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use waybill_core::error::{Result, WaybillError};
use waybill_core::types::{DeviceProfile, PrintTask};

/// Default raw TCP port (HP JetDirect).
pub const RAW_PORT: u16 = 9100;

const RAW_TIMEOUT: Duration = Duration::from_secs(60);
const CHUNK_SIZE: usize = 8192;

/// A physical print device collaborator.
#[async_trait]
pub trait PrintDevice: Send + Sync {
    /// Names of the printers this device layer can reach.
    fn list_devices(&self) -> Result<Vec<String>>;

    /// Capabilities of one printer; unknown names are `PrinterUnavailable`.
    fn profile(&self, name: &str) -> Result<DeviceProfile>;

    /// Print one page; resolves once the device reports completion.
    async fn create_job(&self, name: &str, task: &PrintTask) -> Result<()>;
}

#[derive(Debug, Clone)]
struct RawPrinter {
    profile: DeviceProfile,
    /// `host:port`
    address: String,
}

/// Printers reached by dumping page bytes onto a TCP socket.
#[derive(Debug, Clone, Default)]
pub struct RawSocketDevice {
    printers: Vec<RawPrinter>,
}

impl RawSocketDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a printer. A bare host gets the JetDirect port.
    pub fn with_printer(mut self, profile: DeviceProfile, address: impl Into<String>) -> Self {
        let address = address.into();
        let address = if address.contains(':') {
            address
        } else {
            format!("{address}:{RAW_PORT}")
        };
        self.printers.push(RawPrinter { profile, address });
        self
    }

    fn printer(&self, name: &str) -> Result<&RawPrinter> {
        self.printers
            .iter()
            .find(|p| p.profile.name == name)
            .ok_or_else(|| WaybillError::PrinterUnavailable(format!("no printer named '{name}'")))
    }
}

#[async_trait]
impl PrintDevice for RawSocketDevice {
    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.printers.iter().map(|p| p.profile.name.clone()).collect())
    }

    fn profile(&self, name: &str) -> Result<DeviceProfile> {
        Ok(self.printer(name)?.profile.clone())
    }

    #[instrument(skip(self, task), fields(label = %task.label_identifier, page = task.page_index))]
    async fn create_job(&self, name: &str, task: &PrintTask) -> Result<()> {
        let printer = self.printer(name)?;
        let addr = printer.address.as_str();
        info!(addr, total = task.raster_bytes.len(), "sending page via raw TCP");

        let mut stream = tokio::time::timeout(RAW_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                WaybillError::PrinterUnavailable(format!(
                    "raw TCP connection to {addr} timed out after {}s",
                    RAW_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| WaybillError::PrinterUnavailable(format!("raw TCP connect to {addr}: {e}")))?;

        let mut sent = 0usize;
        for chunk in task.raster_bytes.chunks(CHUNK_SIZE) {
            tokio::time::timeout(RAW_TIMEOUT, stream.write_all(chunk))
                .await
                .map_err(|_| {
                    WaybillError::PrinterUnavailable(format!("raw TCP send to {addr} stalled at byte {sent}"))
                })?
                .map_err(|e| {
                    WaybillError::PrinterUnavailable(format!("raw TCP send failed at byte {sent}: {e}"))
                })?;
            sent += chunk.len();
        }
        stream
            .shutdown()
            .await
            .map_err(|e| WaybillError::PrinterUnavailable(format!("raw TCP close: {e}")))?;

        debug!(addr, sent, "page accepted");
        Ok(())
    }
}
