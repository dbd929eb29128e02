//! Container configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default cap on the number of versions a single object may hold.
pub const DEFAULT_MAX_VERSIONS: usize = 1_000_000;

/// Environment variable overriding [`Config::max_versions`].
pub const ENV_MAX_VERSIONS: &str = "MINIO_API_OBJECT_MAX_VERSIONS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adding a new version id beyond this count fails with
    /// `MaxVersionsExceeded`. Overwrites and loads are never refused.
    pub max_versions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }
}

impl Config {
    /// Parse a JSON config document, e.g. `{"max_versions": 10000}`.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Defaults, overridden by the environment where set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(ENV_MAX_VERSIONS) {
            config.apply_max_versions(&value);
        }
        config
    }

    fn apply_max_versions(&mut self, value: &str) {
        match value.trim().parse::<usize>() {
            Ok(n) if n > 0 => self.max_versions = n,
            _ => warn!(
                "ignoring {}={:?}, keeping {}",
                ENV_MAX_VERSIONS, value, self.max_versions
            ),
        }
    }
}
