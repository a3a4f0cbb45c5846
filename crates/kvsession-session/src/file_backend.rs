use crate::backend::{missing_bucket, KeyValueBackend};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use kvsession_core::{KvSessionError, KvSessionResult};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// On-disk envelope of one value.
#[derive(Serialize, Deserialize)]
struct StoredValue {
    value: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// File-based backend: one directory per bucket, one JSON file per key.
///
/// Writes go through a temporary file and a rename, so readers never observe
/// a half-written value. Expired values read as absent and are removed on
/// access.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub async fn new(root: PathBuf) -> KvSessionResult<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn bucket_dir(&self, bucket: &str) -> KvSessionResult<PathBuf> {
        check_name("bucket", bucket)?;
        Ok(self.root.join(bucket))
    }

    async fn existing_bucket_dir(&self, bucket: &str) -> KvSessionResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(missing_bucket(bucket));
        }
        Ok(dir)
    }

    async fn value_path(&self, bucket: &str, key: &str) -> KvSessionResult<PathBuf> {
        check_name("key", key)?;
        Ok(self
            .existing_bucket_dir(bucket)
            .await?
            .join(format!("{key}.json")))
    }
}

/// Only names that map to a single plain file name are accepted.
fn check_name(kind: &str, name: &str) -> KvSessionResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(KvSessionError::Backend(format!("invalid {kind} name '{name}'")))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn ensure_bucket(&self, bucket: &str) -> KvSessionResult<()> {
        // create_dir_all succeeds when another instance won the race.
        tokio::fs::create_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> KvSessionResult<Option<Vec<u8>>> {
        let path = self.value_path(bucket, key).await?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredValue = serde_json::from_str(&data)
            .map_err(|e| KvSessionError::Backend(format!("corrupt value file for '{key}': {e}")))?;

        if stored.expires_at.is_some_and(|at| at <= Utc::now()) {
            debug!(bucket = %bucket, key = %key, "Removing expired value");
            self.delete(bucket, key).await?;
            return Ok(None);
        }

        let value = STANDARD
            .decode(stored.value)
            .map_err(|e| KvSessionError::Backend(format!("corrupt value file for '{key}': {e}")))?;
        Ok(Some(value))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvSessionResult<()> {
        let path = self.value_path(bucket, key).await?;
        // A TTL beyond chrono's range never expires.
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        let json = serde_json::to_string(&StoredValue {
            value: STANDARD.encode(value),
            expires_at,
        })?;

        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> KvSessionResult<()> {
        let path = self.value_path(bucket, key).await?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
