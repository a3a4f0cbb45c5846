use crate::server::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use kvsession_session::{SessionRegistry, SharedSession};
use std::convert::Infallible;
use std::ops::Deref;
use std::sync::Arc;

/// The request's session under the configured cookie name.
///
/// The registry of acquired sessions lives in the request extensions, so
/// every `Session` extracted during one request shares a single record and
/// the backend is read at most once.
#[derive(Clone)]
pub struct Session {
    record: SharedSession,
    registry: Arc<SessionRegistry>,
}

impl Session {
    /// The per-request registry this session was acquired from.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

impl Deref for Session {
    type Target = SharedSession;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

/// Registry stored in the request extensions, created on first use.
fn request_registry(parts: &mut Parts, state: &AppState) -> Arc<SessionRegistry> {
    if let Some(registry) = parts.extensions.get::<Arc<SessionRegistry>>() {
        return registry.clone();
    }
    let registry = Arc::new(SessionRegistry::new(state.store.clone()));
    parts.extensions.insert(registry.clone());
    registry
}

impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let registry = request_registry(parts, state);
        let record = registry.get(&parts.headers, &state.cookie_name).await;
        Ok(Self { record, registry })
    }
}
