use crate::backend::KeyValueBackend;
use crate::cookie::{CookieSink, RequestCookies, SessionCookie};
use crate::record::{SessionRecord, SessionState, SessionValues};
use kvsession_core::{CookieOptions, KvSessionError, KvSessionResult, StoreConfig};
use kvsession_security::{generate_session_id, IdentifierCodec, KeyPair, DEFAULT_TOKEN_MAX_AGE};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Suffix appended to the key prefix to name the backend bucket.
pub const BUCKET_SUFFIX: &str = "_sessions";

/// Construction options of a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Namespace root; the bucket is `<key_prefix>_sessions`.
    pub key_prefix: String,
    /// Key pairs in rotation order, primary first.
    pub key_pairs: Vec<KeyPair>,
    /// Cookie attributes given to every new or loaded record.
    pub cookie: CookieOptions,
    /// Maximum accepted age of an inbound token.
    pub token_max_age: Duration,
    /// Deadline applied to every backend call.
    pub backend_timeout: Option<Duration>,
}

impl StoreOptions {
    /// Options with the default 30-day policy and no backend deadline.
    pub fn new(key_prefix: impl Into<String>, key_pairs: Vec<KeyPair>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            key_pairs,
            cookie: CookieOptions::default(),
            token_max_age: DEFAULT_TOKEN_MAX_AGE,
            backend_timeout: None,
        }
    }

    /// Build options from a validated configuration.
    pub fn from_config(config: &StoreConfig) -> KvSessionResult<Self> {
        config.validate()?;
        let key_pairs = config
            .decoded_key_pairs()?
            .iter()
            .map(|(auth, enc)| KeyPair::new(auth, enc))
            .collect();
        Ok(Self {
            key_prefix: config.key_prefix.clone(),
            key_pairs,
            cookie: config.cookie.clone(),
            token_max_age: config.token_max_age(),
            backend_timeout: config.backend_timeout(),
        })
    }
}

/// Orchestrates the session lifecycle against a key-value backend.
///
/// Fully configured at construction and immutable afterwards, so one instance
/// is shared by all requests (usually behind an `Arc`) without locking.
///
/// Concurrent saves of the same identifier are last-write-wins: two requests
/// that load one session and change different keys do not merge, and one of
/// the changes is lost.
pub struct SessionStore {
    backend: Arc<dyn KeyValueBackend>,
    codec: IdentifierCodec,
    bucket: String,
    default_options: CookieOptions,
    backend_timeout: Option<Duration>,
}

impl SessionStore {
    /// Create a store and provision its bucket.
    pub async fn new(
        backend: Arc<dyn KeyValueBackend>,
        options: StoreOptions,
    ) -> KvSessionResult<Self> {
        if options.key_prefix.trim().is_empty() {
            return Err(KvSessionError::Config("key_prefix must not be empty".into()));
        }
        let codec = IdentifierCodec::new(options.key_pairs)?.with_max_age(options.token_max_age);
        let store = Self {
            backend,
            codec,
            bucket: format!("{}{BUCKET_SUFFIX}", options.key_prefix),
            default_options: options.cookie,
            backend_timeout: options.backend_timeout,
        };

        store
            .call(store.backend.ensure_bucket(&store.bucket))
            .await?;
        info!(
            bucket = %store.bucket,
            key_pairs = store.codec.key_count(),
            "Session bucket ready"
        );
        Ok(store)
    }

    /// Backend bucket holding this store's sessions.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Cookie options given to new and loaded records.
    pub fn default_options(&self) -> &CookieOptions {
        &self.default_options
    }

    /// The codec sealing identifiers into cookie tokens.
    pub fn codec(&self) -> &IdentifierCodec {
        &self.codec
    }

    /// A fresh record bound to cookie `name`.
    pub fn fresh(&self, name: &str) -> SessionRecord {
        SessionRecord::new(name, self.default_options.clone())
    }

    /// Acquire the session for a request.
    ///
    /// Never fails: a missing, forged, expired or unknown cookie, an
    /// undecodable payload or an unreachable backend all yield a fresh record.
    pub async fn new_session<C>(&self, cookies: &C, name: &str) -> SessionRecord
    where
        C: RequestCookies + ?Sized,
    {
        match self.resume(cookies, name).await {
            Ok(record) => record,
            Err(e) if e.is_recoverable() => {
                debug!(cookie = %name, reason = %e, "Starting fresh session");
                self.fresh(name)
            }
            Err(e) => {
                warn!(cookie = %name, error = %e, "Session lookup failed, starting fresh session");
                self.fresh(name)
            }
        }
    }

    async fn resume<C>(&self, cookies: &C, name: &str) -> KvSessionResult<SessionRecord>
    where
        C: RequestCookies + ?Sized,
    {
        let token = cookies
            .cookie(name)
            .ok_or_else(|| KvSessionError::Credential("no session cookie".into()))?;
        let identifier = self.codec.unseal(name, &token)?;
        self.load(name, &identifier).await
    }

    /// Load the session stored under `identifier`.
    ///
    /// Fails with `NotFound` when the backend has no entry and `Decode` when
    /// the entry is not a JSON object.
    pub async fn load(&self, name: &str, identifier: &str) -> KvSessionResult<SessionRecord> {
        let data = self
            .call(self.backend.get(&self.bucket, identifier))
            .await?
            .ok_or_else(|| KvSessionError::NotFound(identifier.to_string()))?;
        let values: SessionValues = serde_json::from_slice(&data)
            .map_err(|e| KvSessionError::Decode(format!("session '{identifier}': {e}")))?;

        debug!(session_id = %identifier, keys = values.len(), "Session loaded");
        Ok(SessionRecord::loaded(
            name,
            identifier,
            values,
            self.default_options.clone(),
        ))
    }

    /// Persist `record` and emit its cookie into `out`.
    ///
    /// With `max_age <= 0` the backend entry is removed and a clearing cookie
    /// is emitted instead. The cookie is only written once the backend write
    /// has succeeded; on any error nothing reaches `out`.
    pub async fn save<S>(&self, record: &mut SessionRecord, out: &mut S) -> KvSessionResult<()>
    where
        S: CookieSink + ?Sized,
    {
        if record.options.is_expired() {
            if let Some(id) = record.id() {
                self.delete(id).await?;
            }
            out.set_cookie(SessionCookie::removal(record.name(), &record.options))?;
            record.mark_deleted();
            return Ok(());
        }

        if record.state() == SessionState::Deleted {
            return Err(KvSessionError::Session(
                "cannot save a session that was deleted".into(),
            ));
        }

        let payload = serde_json::to_vec(&record.values)?;
        let ttl = Duration::from_secs(record.options.max_age.unsigned_abs());
        let id = record.ensure_id(generate_session_id).to_string();
        // Everything the cookie needs is prepared before the backend write.
        let token = self.codec.seal(record.name(), &id)?;
        let cookie = SessionCookie::new(record.name(), token, record.options.clone());

        self.call(self.backend.put(&self.bucket, &id, payload, Some(ttl)))
            .await?;
        out.set_cookie(cookie)?;

        record.mark_persisted();
        debug!(session_id = %id, max_age = record.options.max_age, "Session saved");
        Ok(())
    }

    /// Remove the session stored under `identifier`. Absent sessions are fine.
    pub async fn delete(&self, identifier: &str) -> KvSessionResult<()> {
        self.call(self.backend.delete(&self.bucket, identifier))
            .await?;
        debug!(session_id = %identifier, "Session deleted");
        Ok(())
    }

    async fn call<T, F>(&self, fut: F) -> KvSessionResult<T>
    where
        F: Future<Output = KvSessionResult<T>>,
    {
        match self.backend_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                KvSessionError::Backend(format!("backend call timed out after {limit:?}"))
            })?,
            None => fut.await,
        }
    }
}
