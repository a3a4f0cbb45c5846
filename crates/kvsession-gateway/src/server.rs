use crate::handlers::{logout_handler, session_handler, set_value_handler};
use axum::{
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use kvsession_session::SessionStore;
use std::sync::Arc;
use tracing::info;

/// Cookie name used when none is configured.
pub const DEFAULT_COOKIE_NAME: &str = "sid";

/// Shared application state.
pub struct AppState {
    /// Store every handler acquires sessions from.
    pub store: Arc<SessionStore>,
    /// Name of the session cookie.
    pub cookie_name: String,
}

/// The HTTP gateway in front of a [`SessionStore`].
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router with the default cookie name.
    pub fn build(store: Arc<SessionStore>) -> Router {
        Self::build_with_cookie(store, DEFAULT_COOKIE_NAME)
    }

    /// Build the router binding sessions to `cookie_name`.
    pub fn build_with_cookie(store: Arc<SessionStore>, cookie_name: impl Into<String>) -> Router {
        let state = Arc::new(AppState {
            store,
            cookie_name: cookie_name.into(),
        });
        info!(
            bucket = %state.store.bucket(),
            cookie = %state.cookie_name,
            "Session gateway routes ready"
        );

        Router::new()
            .route("/health", get(health_handler))
            .route("/session", get(session_handler))
            .route("/session/{key}", post(set_value_handler))
            .route("/logout", post(logout_handler))
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    serde_json::json!({"status": "ok", "service": "kvsession"}).to_string()
}
