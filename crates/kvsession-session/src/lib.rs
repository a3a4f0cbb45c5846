//! Server-side web sessions for kvsession.
//!
//! Session state lives in a [`KeyValueBackend`]; the client only holds a
//! sealed cookie naming the session. A request acquires its
//! [`SessionRecord`] with [`SessionStore::new_session`], mutates it, and
//! writes it back with [`SessionStore::save`].

/// Key-value backend trait and the in-memory backend.
pub mod backend;
/// Request/response cookie boundary.
pub mod cookie;
/// File-based backend.
pub mod file_backend;
/// The per-request session record.
pub mod record;
/// Per-request session cache.
pub mod registry;
/// SQLite backend.
#[cfg(feature = "sqlite")]
pub mod sqlite_backend;
/// Session lifecycle orchestration.
pub mod store;

pub use backend::{KeyValueBackend, MemoryBackend};
pub use cookie::{CookieSink, RequestCookies, SessionCookie};
pub use file_backend::FileBackend;
pub use kvsession_core::{CookieOptions, SameSite};
pub use record::{SessionRecord, SessionState, SessionValues};
pub use registry::{SessionRegistry, SharedSession};
#[cfg(feature = "sqlite")]
pub use sqlite_backend::SqliteBackend;
pub use store::{SessionStore, StoreOptions, BUCKET_SUFFIX};
