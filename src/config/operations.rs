//! Config loading, validation, and accessor operations.

use super::model::LockConfig;
use super::types::LockStrategy;
use crate::error::{LockError, Result};
use std::path::Path;
use std::time::Duration;

impl LockConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .map_err(|e| LockError::io("read config file", path, e))?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LockConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values.
    ///
    /// Rules:
    /// - `poll_interval_ms` must be positive
    /// - `stale_after_secs` must be positive
    ///
    /// A zero `timeout_ms` is allowed and means a single acquisition attempt.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(LockError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.stale_after_secs == 0 {
            return Err(LockError::Config(
                "stale_after_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval_ms = millis(poll_interval);
        self
    }

    /// Set the staleness threshold. Sub-second precision is rounded up.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        let secs = stale_after.as_secs();
        self.stale_after_secs = if stale_after.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        };
        self
    }

    pub fn with_auto_release(mut self, auto_release: bool) -> Self {
        self.auto_release = auto_release;
        self
    }

    pub fn with_strategy(mut self, strategy: LockStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
