//! Session configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::planner;

/// Default symbol size (64 KiB - 1)
pub const DEFAULT_SYMBOL_SIZE: u16 = 65535;

/// Default repair symbols per source symbol
pub const DEFAULT_REDUNDANCY_FACTOR: u8 = 4;

/// Default memory budget (16 GiB)
pub const DEFAULT_MEMORY_BUDGET: u64 = 16 * 1024 * 1024 * 1024;

/// Default number of simultaneous block operations
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Upper bound on the concurrency limit (one worker thread per slot)
pub const MAX_CONCURRENCY_LIMIT: usize = 1024;

/// Symbols are always a multiple of this many bytes
pub const SYMBOL_ALIGNMENT: u16 = 8;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Configuration for one processing session
///
/// All fields are validated when the session is opened. Missing fields in a
/// TOML document fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Symbol size in bytes (1..=65535)
    pub symbol_size: u16,

    /// Repair symbols generated per source symbol
    pub redundancy_factor: u8,

    /// Memory budget in bytes shared by all concurrent block operations
    pub memory_budget: u64,

    /// Maximum simultaneous block operations
    pub concurrency_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol_size: DEFAULT_SYMBOL_SIZE,
            redundancy_factor: DEFAULT_REDUNDANCY_FACTOR,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Build a configuration from a memory limit expressed in megabytes
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the values overflow or fail
    /// validation.
    pub fn from_megabytes(
        symbol_size: u16,
        redundancy_factor: u8,
        max_memory_mb: u64,
        concurrency_limit: u64,
    ) -> Result<Self> {
        let memory_budget = max_memory_mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
            EngineError::InvalidConfig(format!("memory limit of {max_memory_mb} MB overflows"))
        })?;
        let concurrency_limit = usize::try_from(concurrency_limit).map_err(|_| {
            EngineError::InvalidConfig(format!(
                "concurrency limit {concurrency_limit} does not fit this platform"
            ))
        })?;

        let config = Self {
            symbol_size,
            redundancy_factor,
            memory_budget,
            concurrency_limit,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the file does not exist,
    /// [`EngineError::Io`] if it cannot be read, and
    /// [`EngineError::InvalidConfig`] if it does not parse or validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(path.to_path_buf())
            } else {
                EngineError::Io(e)
            }
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;

        tracing::debug!("Loaded session configuration from {}", path.display());
        Ok(config)
    }

    /// Check every field against its bounds
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.symbol_size == 0 {
            return Err(EngineError::InvalidConfig(
                "symbol_size must be between 1 and 65535".into(),
            ));
        }
        if self.redundancy_factor == 0 {
            return Err(EngineError::InvalidConfig(
                "redundancy_factor must be at least 1".into(),
            ));
        }
        if self.memory_budget == 0 {
            return Err(EngineError::InvalidConfig(
                "memory_budget must be non-zero".into(),
            ));
        }
        if self.concurrency_limit == 0 || self.concurrency_limit > MAX_CONCURRENCY_LIMIT {
            return Err(EngineError::InvalidConfig(format!(
                "concurrency_limit must be between 1 and {MAX_CONCURRENCY_LIMIT}"
            )));
        }

        // Every worker must be able to hold at least a one-symbol block
        let minimum = planner::block_footprint(self, u64::from(self.effective_symbol_size()));
        if self.worker_memory_share() < minimum {
            return Err(EngineError::InvalidConfig(format!(
                "memory_budget of {} bytes leaves {} bytes per worker, below the {} bytes one symbol needs",
                self.memory_budget,
                self.worker_memory_share(),
                minimum
            )));
        }

        Ok(())
    }

    /// Symbol size the codec actually produces
    ///
    /// `symbol_size` rounded down to a multiple of [`SYMBOL_ALIGNMENT`], or
    /// raised to it when smaller.
    #[must_use]
    pub fn effective_symbol_size(&self) -> u16 {
        let size = self.symbol_size.max(SYMBOL_ALIGNMENT);
        size - size % SYMBOL_ALIGNMENT
    }

    /// Memory available to each of `concurrency_limit` workers
    #[must_use]
    pub fn worker_memory_share(&self) -> u64 {
        self.memory_budget / self.concurrency_limit.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.symbol_size, 65535);
        assert_eq!(config.redundancy_factor, 4);
        assert_eq!(config.memory_budget, 16 * 1024 * 1024 * 1024);
        assert_eq!(config.concurrency_limit, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_fields_rejected() {
        let base = SessionConfig::default();

        for config in [
            SessionConfig {
                symbol_size: 0,
                ..base.clone()
            },
            SessionConfig {
                redundancy_factor: 0,
                ..base.clone()
            },
            SessionConfig {
                memory_budget: 0,
                ..base.clone()
            },
            SessionConfig {
                concurrency_limit: 0,
                ..base.clone()
            },
            SessionConfig {
                concurrency_limit: MAX_CONCURRENCY_LIMIT + 1,
                ..base.clone()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(EngineError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_budget_too_small_for_workers() {
        let config = SessionConfig {
            symbol_size: 1024,
            redundancy_factor: 2,
            memory_budget: 4 * 4096 - 1, // just under four one-symbol footprints
            concurrency_limit: 4,
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            concurrency_limit: 1,
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_effective_symbol_size() {
        let with_size = |symbol_size| SessionConfig {
            symbol_size,
            ..SessionConfig::default()
        };
        assert_eq!(with_size(1).effective_symbol_size(), 8);
        assert_eq!(with_size(8).effective_symbol_size(), 8);
        assert_eq!(with_size(1023).effective_symbol_size(), 1016);
        assert_eq!(with_size(1024).effective_symbol_size(), 1024);
        assert_eq!(with_size(65535).effective_symbol_size(), 65528);
    }

    #[test]
    fn test_from_megabytes() {
        let config = SessionConfig::from_megabytes(1024, 2, 64, 8).unwrap();
        assert_eq!(config.memory_budget, 64 * 1024 * 1024);
        assert_eq!(config.concurrency_limit, 8);

        assert!(SessionConfig::from_megabytes(1024, 2, u64::MAX, 8).is_err());
        assert!(SessionConfig::from_megabytes(1024, 2, 0, 8).is_err());
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "symbol_size = 4096").unwrap();
        writeln!(file, "concurrency_limit = 2").unwrap();
        file.flush().unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.symbol_size, 4096);
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.redundancy_factor, DEFAULT_REDUNDANCY_FACTOR);
        assert_eq!(config.memory_budget, DEFAULT_MEMORY_BUDGET);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "symbol_size = \"large\"").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SessionConfig::load(dir.path().join("absent.toml")),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = SessionConfig::from_megabytes(2048, 3, 512, 6).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
