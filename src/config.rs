//! Configuration file support.
//!
//! Every key is optional; a missing file means built-in defaults.
//! Looked up at `--config <path>`, else `<config dir>/udpft/config.toml`.

use crate::error::{Result, TransferError};
use crate::transfer::channel::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: NetworkConfig,
    pub retry: RetryConfig,
    pub transfer: TransferConfig,
    pub shutdown: ShutdownConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Receive window per attempt
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_ms: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// 0 = retry forever
    pub max_attempts: u32,
    /// Timeout multiplier per consecutive failed attempt
    pub backoff: f64,
    pub max_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff: 1.0,
            max_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    /// Frames sent by a Fetch holder per data request
    pub fetch_burst: usize,
    /// Frames pushed by an uploader per round
    pub upload_burst: usize,
    /// Show a progress bar for bulk transfers (client only)
    pub progress: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fetch_burst: 256,
            upload_burst: 32,
            progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub attempts: u32,
    pub ack_copies: usize,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            ack_copies: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Consecutive idle receive windows before a holder gives up (0 = never)
    pub idle_limit: u32,
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_limit: 600,
            root: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load from an explicit path, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            TransferError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&text)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("udpft").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.timeout_ms == 0 {
            return Err(TransferError::Config("network.timeout_ms must be > 0".into()));
        }
        if self.retry.backoff < 1.0 || !self.retry.backoff.is_finite() {
            return Err(TransferError::Config("retry.backoff must be >= 1.0".into()));
        }
        if self.retry.max_timeout_ms < self.network.timeout_ms {
            return Err(TransferError::Config(
                "retry.max_timeout_ms must be >= network.timeout_ms".into(),
            ));
        }
        if self.transfer.fetch_burst == 0 || self.transfer.upload_burst == 0 {
            return Err(TransferError::Config("transfer bursts must be > 0".into()));
        }
        if self.shutdown.attempts == 0 {
            return Err(TransferError::Config("shutdown.attempts must be > 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms)
    }

    /// Policy for the unbounded operations (everything but Shutdown).
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.timeout(),
            max_attempts: match self.retry.max_attempts {
                0 => None,
                n => Some(n),
            },
            backoff: self.retry.backoff,
            max_timeout: Duration::from_millis(self.retry.max_timeout_ms),
        }
    }

    pub fn shutdown_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(self.shutdown.attempts),
            ..self.retry_policy()
        }
    }

    /// `None` when holders never give up.
    pub fn idle_limit(&self) -> Option<u32> {
        match self.server.idle_limit {
            0 => None,
            n => Some(n),
        }
    }
}
