use crate::cookie::{CookieSink, RequestCookies};
use crate::record::SessionRecord;
use crate::store::SessionStore;
use kvsession_core::KvSessionResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A session record shared between the parts of one request that use it.
pub type SharedSession = Arc<Mutex<SessionRecord>>;

/// Per-request cache of acquired sessions, keyed by cookie name.
///
/// The first acquisition of a name reads the backend; later acquisitions in
/// the same request return the same record, including any changes made to it
/// in between. Create one registry per request and drop it with the request.
pub struct SessionRegistry {
    store: Arc<SessionStore>,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionRegistry {
    /// An empty registry acquiring sessions from `store`.
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The store sessions are acquired from.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The session bound to cookie `name`, acquired on first use.
    pub async fn get<C>(&self, cookies: &C, name: &str) -> SharedSession
    where
        C: RequestCookies + Sync + ?Sized,
    {
        // Held across the lookup so concurrent first acquisitions read once.
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(name) {
            return session.clone();
        }
        let record = self.store.new_session(cookies, name).await;
        let session = Arc::new(Mutex::new(record));
        sessions.insert(name.to_string(), session.clone());
        session
    }

    /// Number of sessions acquired so far.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session has been acquired yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Save every acquired session, stopping at the first failure.
    pub async fn save_all<S>(&self, out: &mut S) -> KvSessionResult<()>
    where
        S: CookieSink + ?Sized,
    {
        let sessions: Vec<SharedSession> = self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            let mut record = session.lock().await;
            self.store.save(&mut record, out).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{KeyValueBackend, MemoryBackend};
    use crate::cookie::SessionCookie;
    use crate::store::StoreOptions;
    use async_trait::async_trait;
    use kvsession_security::KeyPair;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingGets {
        inner: MemoryBackend,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueBackend for CountingGets {
        async fn ensure_bucket(&self, bucket: &str) -> KvSessionResult<()> {
            self.inner.ensure_bucket(bucket).await
        }
        async fn get(&self, bucket: &str, key: &str) -> KvSessionResult<Option<Vec<u8>>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(bucket, key).await
        }
        async fn put(
            &self,
            bucket: &str,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> KvSessionResult<()> {
            self.inner.put(bucket, key, value, ttl).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> KvSessionResult<()> {
            self.inner.delete(bucket, key).await
        }
    }

    async fn setup() -> (Arc<SessionStore>, Arc<CountingGets>, HashMap<String, String>) {
        let backend = Arc::new(CountingGets {
            inner: MemoryBackend::new(),
            gets: AtomicUsize::new(0),
        });
        let store = SessionStore::new(
            backend.clone(),
            StoreOptions::new("reg", vec![KeyPair::new("auth", "enc")]),
        )
        .await
        .unwrap();

        let mut record = store.fresh("sid");
        record.insert("cart", "3").unwrap();
        let mut out: Vec<SessionCookie> = Vec::new();
        store.save(&mut record, &mut out).await.unwrap();
        let cookies = HashMap::from([("sid".to_string(), out[0].value.clone())]);
        (Arc::new(store), backend, cookies)
    }

    #[tokio::test]
    async fn test_repeated_acquisition_reads_backend_once() {
        let (store, backend, cookies) = setup().await;
        let registry = SessionRegistry::new(store);

        let first = registry.get(&cookies, "sid").await;
        let second = registry.get(&cookies, "sid").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.gets.load(Ordering::SeqCst), 1);
        let record = second.lock().await;
        assert!(!record.is_new());
        assert_eq!(record.get::<String>("cart").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_changes_visible_to_later_acquisition() {
        let (store, _backend, cookies) = setup().await;
        let registry = SessionRegistry::new(store);

        registry
            .get(&cookies, "sid")
            .await
            .lock()
            .await
            .insert("step", 2)
            .unwrap();
        let again = registry.get(&cookies, "sid").await;
        assert_eq!(again.lock().await.get::<i32>("step"), Some(2));
    }

    #[tokio::test]
    async fn test_names_are_cached_separately() {
        let (store, backend, cookies) = setup().await;
        let registry = SessionRegistry::new(store);

        let sid = registry.get(&cookies, "sid").await;
        let other = registry.get(&cookies, "other").await;
        assert!(!Arc::ptr_eq(&sid, &other));
        assert!(other.lock().await.is_new());
        assert_eq!(registry.len().await, 2);
        // "other" has no cookie, so only "sid" reached the backend.
        assert_eq!(backend.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_all_persists_every_session() {
        let (store, _backend, cookies) = setup().await;
        let registry = SessionRegistry::new(store.clone());

        registry.get(&cookies, "sid").await.lock().await.insert("a", 1).unwrap();
        registry.get(&cookies, "prefs").await.lock().await.insert("b", 2).unwrap();

        let mut out: Vec<SessionCookie> = Vec::new();
        registry.save_all(&mut out).await.unwrap();
        assert_eq!(out.len(), 2);

        let sid_id = registry.get(&cookies, "sid").await.lock().await.id().unwrap().to_string();
        let reloaded = store.load("sid", &sid_id).await.unwrap();
        assert_eq!(reloaded.get::<i32>("a"), Some(1));
    }
}
