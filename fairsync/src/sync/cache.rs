use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    source: String,
    written_at: i64,
    payload: Value,
}

/// Durable key → JSON document storage with age-based invalidation.
///
/// Reads fail soft: a missing file, an unreadable document, or an expired
/// stamp all come back as `None`, so callers uniformly treat "empty" as
/// "must refetch". Writes replace the whole document.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the payload iff the document exists, parses, and was written
    /// less than `max_age` ago. `max_age` of zero always misses.
    pub async fn read(&self, key: &str, max_age: Duration) -> Option<Value> {
        if max_age.is_zero() {
            debug!(key, "cache miss: unconditional regeneration requested");
            return None;
        }
        let path = self.dir.join(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(key, error = %err, "cache miss: unreadable");
                return None;
            }
        };
        let document: CacheDocument = match serde_json::from_slice(&raw) {
            Ok(document) => document,
            Err(err) => {
                debug!(key, error = %err, "cache miss: invalid document");
                return None;
            }
        };
        let age = OffsetDateTime::now_utc().unix_timestamp() - document.written_at;
        if age >= max_age.as_secs() as i64 {
            debug!(key, age, "cache miss: expired");
            return None;
        }
        debug!(key, age, "cache hit");
        Some(document.payload)
    }

    pub async fn write(&self, key: &str, payload: &Value) -> Result<(), CacheError> {
        self.write_stamped(key, payload, OffsetDateTime::now_utc().unix_timestamp())
            .await
    }

    pub(crate) async fn write_stamped(
        &self,
        key: &str,
        payload: &Value,
        written_at: i64,
    ) -> Result<(), CacheError> {
        let path = self.dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let document = CacheDocument {
            source: key.to_string(),
            written_at,
            payload: payload.clone(),
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&document)?).await?;
        Ok(())
    }

    pub async fn read_as<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let value = self.read(key, max_age).await?;
        match serde_json::from_value(value) {
            Ok(payload) => Some(payload),
            Err(err) => {
                debug!(key, error = %err, "cache miss: payload shape mismatch");
                None
            }
        }
    }

    pub async fn write_as<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), CacheError> {
        self.write(key, &serde_json::to_value(payload)?).await
    }
}
