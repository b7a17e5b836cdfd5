// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Configuration via `kstreamer.yaml`.

use std::path::Path;
use std::time::Duration;

use kstreamer_wire::HEADER_LEN;
use serde::{Deserialize, Serialize};

use crate::error::{KsError, Result};

/// Smallest datagram buffer that still holds a header plus a few attributes.
pub const MIN_BUFFER_SIZE: usize = HEADER_LEN * 4;

/// Control server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long an explicit topology lock may be held before it is
    /// force-released.
    pub lock_watchdog_ms: u64,
    /// How long a request may stay parked waiting for the topology lock
    /// before it is answered with AGAIN.
    pub implicit_lock_timeout_ms: u64,
    /// Dispatch worker threads. Requests are sharded by requester port.
    pub dispatch_workers: usize,
    /// Reply datagram size.
    pub buffer_size: usize,
    /// Interval at which parked requests are retried when no release wakes them.
    pub backlog_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lock_watchdog_ms: 5000,
            implicit_lock_timeout_ms: 5000,
            dispatch_workers: 1,
            buffer_size: 4096,
            backlog_poll_ms: 50,
        }
    }
}

impl ServerConfig {
    pub fn lock_watchdog(&self) -> Duration {
        Duration::from_millis(self.lock_watchdog_ms)
    }

    pub fn implicit_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.implicit_lock_timeout_ms)
    }

    pub fn backlog_poll(&self) -> Duration {
        Duration::from_millis(self.backlog_poll_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_watchdog_ms == 0 {
            return Err(KsError::Configuration(
                "server.lock_watchdog_ms must be greater than zero".into(),
            ));
        }
        if self.dispatch_workers == 0 {
            return Err(KsError::Configuration(
                "server.dispatch_workers must be at least 1".into(),
            ));
        }
        if self.backlog_poll_ms == 0 {
            return Err(KsError::Configuration(
                "server.backlog_poll_ms must be greater than zero".into(),
            ));
        }
        validate_buffer_size("server.buffer_size", self.buffer_size)
    }
}

/// Client connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on waiting for a reply. `None` waits forever.
    pub request_timeout_ms: Option<u64>,
    /// Request datagram size.
    pub buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: None,
            buffer_size: 4096,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == Some(0) {
            return Err(KsError::Configuration(
                "client.request_timeout_ms must be greater than zero".into(),
            ));
        }
        validate_buffer_size("client.buffer_size", self.buffer_size)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

/// Top-level configuration from `kstreamer.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KsConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

impl KsConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "kstreamer.yaml";

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| KsError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory. Returns error if the file is
    /// missing, cannot be parsed, or holds invalid values.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            KsError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            KsError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded kstreamer config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file
    /// is missing or unusable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()
    }
}

fn validate_buffer_size(field: &str, size: usize) -> Result<()> {
    if size < MIN_BUFFER_SIZE {
        return Err(KsError::Configuration(format!(
            "{} must be at least {} bytes, got {}",
            field, MIN_BUFFER_SIZE, size
        )));
    }
    Ok(())
}
