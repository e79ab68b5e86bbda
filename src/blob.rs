//! Key-addressed blob storage with signed download URLs
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::config::BlobConfig;
use super::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the locator to read them back.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;
    fn get(&self, locator: &str) -> Result<Vec<u8>>;
    fn signed_url(&self, locator: &str, ttl: Duration) -> Result<String>;
}

/// Blob store kept in its own tree of the service's sled database.
pub struct SledBlobStore {
    tree: sled::Tree,
    config: BlobConfig,
}

impl SledBlobStore {
    pub fn open(db: &sled::Db, config: BlobConfig) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree("blobs")?,
            config,
        })
    }

    fn mac(&self, locator: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.config.signing_secret.as_bytes())
            .map_err(|e| Error::Blob(format!("invalid signing secret: {e}")))?;
        mac.update(locator.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, locator: &str, expires: i64) -> Result<String> {
        Ok(hex::encode(self.mac(locator, expires)?.finalize().into_bytes()))
    }

    /// Check a URL's signature and expiry as issued by [`BlobStore::signed_url`].
    pub fn verify_signature(&self, locator: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let (Ok(given), Ok(mac)) = (hex::decode(signature), self.mac(locator, expires)) else {
            return false;
        };
        let computed = mac.finalize().into_bytes();
        if given.len() != computed.len() {
            return false;
        }
        given.ct_eq(computed.as_slice()).into()
    }
}

impl BlobStore for SledBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.tree.insert(key.as_bytes(), bytes)?;
        Ok(key.to_string())
    }

    fn get(&self, locator: &str) -> Result<Vec<u8>> {
        match self.tree.get(locator.as_bytes())? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(Error::Blob(format!("no blob at {locator}"))),
        }
    }

    fn signed_url(&self, locator: &str, ttl: Duration) -> Result<String> {
        if self.tree.get(locator.as_bytes())?.is_none() {
            return Err(Error::Blob(format!("no blob at {locator}")));
        }
        let expires = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| Utc::now().timestamp().checked_add(secs))
            .ok_or_else(|| Error::Blob(format!("url ttl of {}s is out of range", ttl.as_secs())))?;

        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.config.url_base.trim_end_matches('/'),
            locator,
            expires,
            self.signature(locator, expires)?
        ))
    }
}
