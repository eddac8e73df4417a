//! Store configuration.
//!
//! Lives at `<root>/store.toml`. Every entry point receives a
//! [`StoreConfig`] value explicitly; nothing here reads the environment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use ghg_index::LockOptions;
use ghg_store::fsutil;
use ghg_store::ChunkHints;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// File name of the store configuration inside the store root.
pub const STORE_CONFIG_FILE: &str = "store.toml";

/// Tunables of one store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a commit waits for the index lock.
    pub lock_timeout_ms: u64,
    /// Delay between lock attempts.
    pub lock_poll_ms: u64,
    /// Age after which a lock file is considered abandoned.
    pub stale_lock_secs: u64,
    /// Optimistic commit attempts before giving up.
    pub commit_retries: u32,
    /// Rows per payload chunk.
    pub chunk_rows: usize,
    /// zstd level for cached source files.
    pub compression_level: i32,
    /// Unreferenced chunks younger than this may belong to an ingest that
    /// has not committed yet; check and prune leave them alone.
    pub prune_grace_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            lock_poll_ms: 50,
            stale_lock_secs: 600,
            commit_retries: 5,
            chunk_rows: ChunkHints::default().max_rows,
            compression_level: 3,
            prune_grace_secs: 3_600,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// Read the configuration of the store rooted at `root`.
    pub fn load(root: &Path) -> SdkResult<Self> {
        let path = root.join(STORE_CONFIG_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SdkError::NotInitialized(root.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the configuration into the store rooted at `root`.
    pub fn save(&self, root: &Path) -> SdkResult<()> {
        let text = self.to_toml_string()?;
        fsutil::write_atomic(&root.join(STORE_CONFIG_FILE), text.as_bytes())?;
        Ok(())
    }

    /// Reject values no store can run with.
    pub fn validate(&self) -> SdkResult<()> {
        if self.commit_retries == 0 {
            return Err(SdkError::Config("commit_retries must be at least 1".into()));
        }
        if self.chunk_rows == 0 {
            return Err(SdkError::Config("chunk_rows must be at least 1".into()));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(SdkError::Config(format!(
                "compression_level {} outside 1..=22",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            poll_interval: Duration::from_millis(self.lock_poll_ms),
            stale_after: Duration::from_secs(self.stale_lock_secs),
        }
    }

    pub fn prune_grace(&self) -> chrono::Duration {
        // chrono::Duration holds at most i64::MAX milliseconds.
        let secs = self.prune_grace_secs.min(i64::MAX as u64 / 1_000);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn chunk_hints(&self) -> ChunkHints {
        ChunkHints {
            max_rows: self.chunk_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_uses_defaults() {
        let config = StoreConfig::from_toml_str("commit_retries = 9\n").unwrap();
        assert_eq!(config.commit_retries, 9);
        assert_eq!(config.lock_poll_ms, StoreConfig::default().lock_poll_ms);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(StoreConfig::from_toml_str("commit_retries = 0").is_err());
        assert!(StoreConfig::from_toml_str("compression_level = 40").is_err());
        assert!(StoreConfig::from_toml_str("chunk_rows = \"many\"").is_err());
        let zero = StoreConfig {
            commit_retries: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(zero.validate(), Err(SdkError::Config(_))));
    }

    #[test]
    fn huge_grace_saturates() {
        let config = StoreConfig {
            prune_grace_secs: u64::MAX,
            ..StoreConfig::default()
        };
        assert!(config.prune_grace() > chrono::Duration::days(365 * 1_000));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            lock_timeout_ms: 1_000,
            ..StoreConfig::default()
        };
        config.save(dir.path()).unwrap();
        assert_eq!(StoreConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn missing_file_means_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            StoreConfig::load(dir.path()),
            Err(SdkError::NotInitialized(_))
        ));
    }
}
