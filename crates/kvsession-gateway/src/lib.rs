//! HTTP surface for the session store: axum handlers that acquire a session
//! from the request cookies, mutate it and write it back into the response.

/// Request extractor for the per-request session.
pub mod extract;
/// Route handlers.
pub mod handlers;
/// Router construction and shared state.
pub mod server;

pub use extract::Session;
pub use server::{AppState, GatewayServer, DEFAULT_COOKIE_NAME};
