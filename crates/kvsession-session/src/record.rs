use kvsession_core::{CookieOptions, KvSessionResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// The application payload of a session.
///
/// Keys are strings by construction, so every entry survives persistence;
/// values are arbitrary JSON.
pub type SessionValues = HashMap<String, serde_json::Value>;

/// Where a record is in its per-request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No backing record was found for the request.
    Fresh,
    /// Loaded from the backend.
    Loaded,
    /// Written to the backend by a save.
    Persisted,
    /// Removed from the backend. Terminal.
    Deleted,
}

/// One session's mutable state plus metadata.
///
/// Owned by exactly one request at a time; the handler mutates `values` and
/// `options` between acquisition and save.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    name: String,
    id: Option<String>,
    /// Session payload.
    pub values: SessionValues,
    /// Cookie attributes and expiry policy. `max_age <= 0` deletes on save.
    pub options: CookieOptions,
    is_new: bool,
    state: SessionState,
}

impl SessionRecord {
    /// A fresh record with no identifier.
    pub fn new(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            id: None,
            values: SessionValues::new(),
            options,
            is_new: true,
            state: SessionState::Fresh,
        }
    }

    pub(crate) fn loaded(
        name: impl Into<String>,
        id: impl Into<String>,
        values: SessionValues,
        options: CookieOptions,
    ) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
            values,
            options,
            is_new: false,
            state: SessionState::Loaded,
        }
    }

    /// Cookie name this record is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session identifier, once assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// True iff no backing record was found for the inbound request.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Deserialize the value stored under `key`.
    ///
    /// Returns `None` when the key is absent or holds a different shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Serialize `value` under `key`, returning the previous value.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> KvSessionResult<Option<serde_json::Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.values.insert(key.into(), value))
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    /// Drop every value, keeping identifier and options.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Mark the session for deletion on the next save.
    pub fn expire(&mut self) {
        self.options.max_age = 0;
    }

    /// Assign the identifier if none is set yet; returns the identifier.
    pub(crate) fn ensure_id(&mut self, generate: impl FnOnce() -> String) -> &str {
        self.id.get_or_insert_with(generate)
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.is_new = false;
        self.state = SessionState::Persisted;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = SessionState::Deleted;
    }
}
