use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest accepted rate: permit accrual is computed in `f64`, which holds
/// integers exactly up to 2^53.
pub const MAX_RPS: u64 = 1 << 53;

/// Configuration for a throttler link
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    /// Link name, used in counter names and logs
    #[serde(default = "default_name")]
    pub name: String,

    /// Permits per second per key
    pub rps: u64,

    /// Metadata field that partitions buckets.
    /// Unset or empty means one global bucket.
    #[serde(default)]
    pub msg_key: Option<String>,
}

fn default_name() -> String {
    "throttler".to_string()
}

impl ThrottlerConfig {
    pub fn new(name: impl Into<String>, rps: u64) -> Self {
        Self {
            name: name.into(),
            rps,
            msg_key: None,
        }
    }

    pub fn with_msg_key(mut self, msg_key: impl Into<String>) -> Self {
        self.msg_key = Some(msg_key.into());
        self
    }

    /// Partitioning field, if any (empty names count as unset)
    pub fn partition_field(&self) -> Option<&str> {
        self.msg_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        if self.rps > MAX_RPS {
            return Err(ConfigError::RateTooLarge { rps: self.rps });
        }
        Ok(())
    }
}

/// Invalid throttler configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingName,
    RateTooLarge { rps: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingName => write!(f, "throttler name is required"),
            ConfigError::RateTooLarge { rps } => {
                write!(f, "rps {} exceeds the maximum of {}", rps, MAX_RPS)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
