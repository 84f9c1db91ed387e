//! Configuration for the keyed lock reaper and ring buffer sizing.
//!
//! The daemon reads a JSON document shaped like:
//!
//! ```json
//! {
//!   "keyed_lock": { "reap_interval_ms": 60000 },
//!   "ring_buffer": { "capacity": 1024 }
//! }
//! ```
//!
//! Every field is optional; missing sections fall back to [`Default`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Default interval between reaper sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of slots in a ring buffer.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Settings for a [`KeyedLock`](crate::KeyedLock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyedLockConfig {
    /// Milliseconds between reaper sweeps. `0` disables the background reaper.
    pub reap_interval_ms: u64,
}

impl KeyedLockConfig {
    /// Reaper interval as a [`Duration`], or `None` when disabled.
    pub fn reap_interval(&self) -> Option<Duration> {
        if self.reap_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.reap_interval_ms))
        }
    }

    /// Config with the background reaper switched off.
    pub fn manual_reap() -> Self {
        Self { reap_interval_ms: 0 }
    }

    /// Config with a custom sweep interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            reap_interval_ms: interval.as_millis() as u64,
        }
    }
}

impl Default for KeyedLockConfig {
    fn default() -> Self {
        Self {
            reap_interval_ms: DEFAULT_REAP_INTERVAL.as_millis() as u64,
        }
    }
}

/// Settings for a [`RingBuffer`](crate::RingBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    /// Number of slots allocated up front.
    pub capacity: usize,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub keyed_lock: KeyedLockConfig,
    pub ring_buffer: RingBufferConfig,
}

impl SyncConfig {
    /// Parse a config from a JSON string and validate it.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading sync config");
        let raw = fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Reject values the primitives cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer.capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "ring_buffer.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.keyed_lock.reap_interval(), Some(DEFAULT_REAP_INTERVAL));
        assert_eq!(config.ring_buffer.capacity, DEFAULT_RING_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SyncConfig::from_json(r#"{ "ring_buffer": { "capacity": 16 } }"#).unwrap();
        assert_eq!(config.ring_buffer.capacity, 16);
        assert_eq!(config.keyed_lock, KeyedLockConfig::default());
    }

    #[test]
    fn test_zero_interval_disables_reaper() {
        let config = SyncConfig::from_json(r#"{ "keyed_lock": { "reap_interval_ms": 0 } }"#).unwrap();
        assert_eq!(config.keyed_lock.reap_interval(), None);
        assert_eq!(KeyedLockConfig::manual_reap().reap_interval(), None);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = SyncConfig::from_json(r#"{ "ring_buffer": { "capacity": 0 } }"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = SyncConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, SyncError::ConfigParse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "keyed_lock": {{ "reap_interval_ms": 250 }}, "ring_buffer": {{ "capacity": 8 }} }}"#
        )
        .unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.keyed_lock.reap_interval(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.ring_buffer.capacity, 8);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SyncError::ConfigRead { .. }));
    }
}
