// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaybillError};

/// Settings for one client instance.
///
/// Unknown fields are rejected; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdkConfig {
    /// Cloud label service base address (required).
    pub cloud_address: String,
    /// Local-network label service instances, tried before the cloud.
    pub local_addresses: Vec<String>,
    /// Period of the background liveness probe.
    pub probe_interval_secs: u64,
    /// A probe slower than this marks the candidate unhealthy.
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Read timeout for label lookups.
    pub read_timeout_secs: u64,
    /// Read timeout for image status requests.
    pub status_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Sleep after a transport failure before polling again.
    pub transport_backoff_ms: u64,
    /// Sleep after a "still generating" answer before polling again.
    pub not_ready_backoff_ms: u64,
    /// Consecutive transport failures tolerated per label.
    pub max_transport_retries: u32,
    /// Print workers draining the queue (1 keeps request order on one device).
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Printer used when a request names none.
    pub default_printer: Option<String>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            cloud_address: String::new(),
            local_addresses: Vec::new(),
            probe_interval_secs: 20,
            probe_timeout_secs: 10,
            connect_timeout_secs: 3,
            read_timeout_secs: 15,
            status_timeout_secs: 30,
            download_timeout_secs: 15,
            transport_backoff_ms: 5_000,
            not_ready_backoff_ms: 2_000,
            max_transport_retries: 5,
            worker_count: 1,
            queue_capacity: 64,
            default_printer: None,
        }
    }
}

impl SdkConfig {
    /// Cloud-only configuration with defaults for everything else.
    pub fn with_cloud(cloud_address: impl Into<String>) -> Self {
        Self {
            cloud_address: cloud_address.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject settings that cannot work at all.
    ///
    /// Address syntax is checked by the router when it is configured.
    pub fn validate(&self) -> Result<()> {
        if self.cloud_address.trim().is_empty() {
            return Err(WaybillError::InvalidConfig(
                "cloud_address is required".into(),
            ));
        }
        if self.probe_interval_secs == 0 {
            return Err(WaybillError::InvalidConfig(
                "probe_interval_secs must be positive".into(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(WaybillError::InvalidConfig(
                "probe_timeout_secs must be positive".into(),
            ));
        }
        if self.worker_count == 0 || self.queue_capacity == 0 {
            return Err(WaybillError::InvalidConfig(
                "worker_count and queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn transport_backoff(&self) -> Duration {
        Duration::from_millis(self.transport_backoff_ms)
    }

    pub fn not_ready_backoff(&self) -> Duration {
        Duration::from_millis(self.not_ready_backoff_ms)
    }
}
