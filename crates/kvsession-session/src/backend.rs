use async_trait::async_trait;
use kvsession_core::{KvSessionError, KvSessionResult};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A durable key → bytes mapping, namespaced into buckets.
///
/// This is the seam to the external key-value service. Implementations must
/// be safe to share across concurrent requests.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Create `bucket` if it does not exist yet.
    ///
    /// Must be idempotent and tolerate other store instances creating the
    /// same bucket concurrently.
    async fn ensure_bucket(&self, bucket: &str) -> KvSessionResult<()>;

    /// Fetch the value under `key`. Absent or expired keys yield `None`.
    async fn get(&self, bucket: &str, key: &str) -> KvSessionResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// `ttl` is the per-key expiry; `None` keeps the value until deleted.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvSessionResult<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> KvSessionResult<()>;
}

pub(crate) fn missing_bucket(bucket: &str) -> KvSessionError {
    KvSessionError::Backend(format!("bucket '{bucket}' does not exist"))
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process backend. Values do not survive a restart and are not shared
/// across replicas; suitable for tests and single-node development.
pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, HashMap<String, Entry>>>,
}

impl MemoryBackend {
    /// Create an empty backend with no buckets.
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live entries in `bucket` (0 if the bucket does not exist).
    pub async fn len(&self, bucket: &str) -> usize {
        let now = Instant::now();
        self.buckets
            .read()
            .await
            .get(bucket)
            .map_or(0, |entries| entries.values().filter(|e| e.is_live(now)).count())
    }

    /// Whether `bucket` holds no live entries.
    pub async fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket).await == 0
    }

    /// Whether `bucket` has been provisioned.
    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn ensure_bucket(&self, bucket: &str) -> KvSessionResult<()> {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> KvSessionResult<Option<Vec<u8>>> {
        let buckets = self.buckets.read().await;
        let entries = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvSessionResult<()> {
        let mut buckets = self.buckets.write().await;
        let entries = buckets.get_mut(bucket).ok_or_else(|| missing_bucket(bucket))?;
        let now = Instant::now();
        // Expired entries are dropped lazily on write.
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value,
                // A TTL beyond the clock's range never expires.
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> KvSessionResult<()> {
        let mut buckets = self.buckets.write().await;
        let entries = buckets.get_mut(bucket).ok_or_else(|| missing_bucket(bucket))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        backend.ensure_bucket("app_sessions").await.unwrap();

        backend
            .put("app_sessions", "k", b"v".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(
            backend.get("app_sessions", "k").await.unwrap(),
            Some(b"v".to_vec())
        );

        backend.delete("app_sessions", "k").await.unwrap();
        assert!(backend.get("app_sessions", "k").await.unwrap().is_none());
        // Deleting again is fine.
        backend.delete("app_sessions", "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_bucket_is_backend_error() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.get("nope", "k").await,
            Err(KvSessionError::Backend(_))
        ));
        assert!(matches!(
            backend.put("nope", "k", vec![], None).await,
            Err(KvSessionError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_bucket_keeps_entries() {
        let backend = MemoryBackend::new();
        backend.ensure_bucket("b").await.unwrap();
        backend.put("b", "k", b"v".to_vec(), None).await.unwrap();
        backend.ensure_bucket("b").await.unwrap();
        assert_eq!(backend.len("b").await, 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let backend = MemoryBackend::new();
        backend.ensure_bucket("b").await.unwrap();
        backend
            .put("b", "k", b"v".to_vec(), Some(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(backend.get("b", "k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_concurrent_bucket_creation() {
        let backend = Arc::new(MemoryBackend::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let b = backend.clone();
            handles.push(tokio::spawn(async move { b.ensure_bucket("shared").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(backend.has_bucket("shared").await);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend.ensure_bucket("b").await.unwrap();
        backend
            .put("b", "short", b"v".to_vec(), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        backend
            .put("b", "long", b"v".to_vec(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(backend.get("b", "short").await.unwrap().is_none());
        assert!(backend.get("b", "long").await.unwrap().is_some());
        assert_eq!(backend.len("b").await, 1);
    }
}
