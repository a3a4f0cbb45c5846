//! Core types and error definitions for kvsession.
//!
//! This crate provides the foundational types shared across all kvsession
//! crates: the unified error type, the cookie attributes attached to every
//! session, and the TOML configuration layer.
//!
//! # Main types
//!
//! - [`KvSessionError`]: Unified error enum for all kvsession subsystems.
//! - [`KvSessionResult`]: Convenience alias for `Result<T, KvSessionError>`.
//! - [`CookieOptions`]: Cookie attributes and expiry policy of a session.
//! - [`StoreConfig`]: Deserialized store configuration.

/// TOML configuration for a session store.
pub mod config;

pub use config::{BackendConfig, BackendKind, KeyPairConfig, StoreConfig};

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for kvsession.
///
/// The first group of variants mirrors the session error taxonomy: read-side
/// failures (`Credential`, `Integrity`, `NotFound`, `Decode`) are recovered by
/// session acquisition, everything else is surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum KvSessionError {
    /// The inbound cookie token is missing, expired or otherwise unusable.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The token failed authentication against every known key pair, or is
    /// structurally malformed.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The backend holds no entry for the given identifier.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A stored payload is not a valid session value mapping.
    #[error("Decode error: {0}")]
    Decode(String),

    /// An I/O, connectivity or timeout failure talking to the key-value backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The session lifecycle was misused (e.g. saving a deleted session).
    #[error("Session error: {0}")]
    Session(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KvSessionError {
    /// Returns true for failures that session acquisition degrades into a
    /// fresh session instead of reporting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Credential(_) | Self::Integrity(_) | Self::NotFound(_) | Self::Decode(_)
        )
    }
}

/// A convenience `Result` alias using [`KvSessionError`].
pub type KvSessionResult<T> = Result<T, KvSessionError>;

// --- Cookie options ---

/// Default session lifetime: 30 days, in seconds.
pub const DEFAULT_MAX_AGE: i64 = 86_400 * 30;

pub use cookie::SameSite;

/// Lowercase (`lax`, `strict`, `none`) serde form of an optional [`SameSite`].
mod same_site_serde {
    use super::SameSite;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<SameSite>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(SameSite::Lax) => s.serialize_some("lax"),
            Some(SameSite::Strict) => s.serialize_some("strict"),
            Some(SameSite::None) => s.serialize_some("none"),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SameSite>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|value| match value.to_ascii_lowercase().as_str() {
            "lax" => Ok(SameSite::Lax),
            "strict" => Ok(SameSite::Strict),
            "none" => Ok(SameSite::None),
            other => Err(D::Error::custom(format!("unknown same_site value '{other}'"))),
        })
        .transpose()
    }
}

/// Cookie attributes and expiry policy of a session.
///
/// `max_age` is in seconds; a value `<= 0` means "delete now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    /// Cookie `Path` attribute.
    #[serde(default = "default_path")]
    pub path: String,
    /// Optional cookie `Domain` attribute.
    #[serde(default)]
    pub domain: Option<String>,
    /// Lifetime in seconds, used for both `Max-Age` and the backend TTL.
    #[serde(default = "default_max_age")]
    pub max_age: i64,
    /// Emit the `Secure` attribute.
    #[serde(default)]
    pub secure: bool,
    /// Emit the `HttpOnly` attribute.
    #[serde(default)]
    pub http_only: bool,
    /// Optional `SameSite` attribute.
    #[serde(default, with = "same_site_serde")]
    pub same_site: Option<SameSite>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_max_age() -> i64 {
    DEFAULT_MAX_AGE
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
            domain: None,
            max_age: DEFAULT_MAX_AGE,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

impl CookieOptions {
    /// Whether this policy asks for the session to be deleted.
    pub fn is_expired(&self) -> bool {
        self.max_age <= 0
    }
}
