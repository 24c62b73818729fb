//! Configuration for one synchronization run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use davsync_common::{Error, Result};

/// Transfer direction for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local tree is the source of truth; the remote tree is updated.
    Push,
    /// Remote tree is the source of truth; the local tree is updated.
    Pull,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Configuration for the sync engine. Immutable once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Transfer direction.
    pub direction: Direction,
    /// Remove destination entries absent from the source after the pass.
    pub mirror_deletes: bool,
    /// Compare file content instead of timestamps. Reserved extension
    /// point: accepted here and in the config file, not yet consulted by
    /// the decision logic.
    pub compare_content: bool,
    /// Maximum number of simultaneously in-flight operations.
    pub max_concurrent: usize,
    /// Total attempts per transfer, including the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each attempt.
    pub retry_base_delay: Duration,
}

impl SyncConfig {
    /// Validate the bounds the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent < 1 {
            return Err(Error::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.max_retries < 1 {
            return Err(Error::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Pull,
            mirror_deletes: false,
            compare_content: false,
            max_concurrent: 5,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let cfg = SyncConfig {
            max_concurrent: 0,
            ..SyncConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_retries() {
        let cfg = SyncConfig {
            max_retries: 0,
            ..SyncConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
