//! Service configuration, passed explicitly into [`crate::service::PackageService`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub lifecycle: LifecycleConfig,
    pub bundles: BundleConfig,
    pub blobs: BlobConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Reason recorded on a first submission when the caller gives none.
    pub initial_submission_reason: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initial_submission_reason: "Initial submission".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BundleConfig {
    /// Generate bundles right after a submit commits. When off, jobs wait for
    /// `retry_pending_bundles`.
    pub generate_inline: bool,
    pub key_prefix: String,
    pub max_attempts: u32,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            generate_inline: true,
            key_prefix: "zips".to_string(),
            max_attempts: 5,
        }
    }
}

/// Longest lifetime a signed download URL may be issued for (seven days).
pub const MAX_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BlobConfig {
    pub url_base: String,
    pub signing_secret: String,
    pub url_ttl_secs: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            url_base: "http://localhost:4569/blobs".to_string(),
            signing_secret: String::new(),
            url_ttl_secs: 3_600,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.blobs.url_ttl_secs == 0 || self.blobs.url_ttl_secs > MAX_URL_TTL_SECS {
            return Err(Error::InvalidConfig(format!(
                "blobs.url_ttl_secs must be between 1 and {MAX_URL_TTL_SECS}, got {}",
                self.blobs.url_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
