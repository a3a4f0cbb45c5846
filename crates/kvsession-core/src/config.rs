use crate::{CookieOptions, KvSessionError, KvSessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding `auth:enc,auth:enc` hex key pairs.
pub const KEY_PAIRS_ENV: &str = "KVSESSION_KEY_PAIRS";

/// One hex-encoded `(auth_key, enc_key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairConfig {
    /// Hex-encoded authentication (MAC) key.
    pub auth_key: String,
    /// Hex-encoded encryption key.
    pub enc_key: String,
}

impl KeyPairConfig {
    /// Decode both keys from hex.
    pub fn decode(&self) -> KvSessionResult<(Vec<u8>, Vec<u8>)> {
        let auth = hex::decode(self.auth_key.trim())
            .map_err(|e| KvSessionError::Config(format!("invalid auth_key hex: {e}")))?;
        let enc = hex::decode(self.enc_key.trim())
            .map_err(|e| KvSessionError::Config(format!("invalid enc_key hex: {e}")))?;
        if auth.is_empty() || enc.is_empty() {
            return Err(KvSessionError::Config("key material must not be empty".into()));
        }
        Ok((auth, enc))
    }
}

/// Which key-value backend the store talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process map. Not shared across replicas.
    #[default]
    Memory,
    /// One directory per bucket on local disk.
    File,
    /// SQLite database file (requires the `sqlite` feature).
    Sqlite,
}

/// Backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend implementation.
    #[serde(default)]
    pub kind: BackendKind,
    /// Directory (file) or database path (sqlite). Ignored for memory.
    #[serde(default = "default_backend_path")]
    pub path: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            path: default_backend_path(),
        }
    }
}

/// Configuration of a session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Namespace root; the backend bucket is `<key_prefix>_sessions`.
    pub key_prefix: String,
    /// Key pairs in rotation order, primary first.
    #[serde(default)]
    pub key_pairs: Vec<KeyPairConfig>,
    /// Default cookie attributes and expiry policy.
    #[serde(default)]
    pub cookie: CookieOptions,
    /// Maximum accepted token age in seconds. `0` disables the check.
    #[serde(default = "default_token_max_age")]
    pub token_max_age_secs: u64,
    /// Deadline for a single backend call, in milliseconds.
    #[serde(default)]
    pub backend_timeout_ms: Option<u64>,
    /// Backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_token_max_age() -> u64 {
    86_400 * 30
}

fn default_backend_path() -> PathBuf {
    PathBuf::from("./data/sessions")
}

impl StoreConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> KvSessionResult<Self> {
        toml::from_str(raw).map_err(|e| KvSessionError::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> KvSessionResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KvSessionError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Replace the configured key pairs with the ones in [`KEY_PAIRS_ENV`], if set.
    pub fn apply_env(&mut self) -> KvSessionResult<()> {
        self.override_key_pairs(std::env::var(KEY_PAIRS_ENV).ok().as_deref())
    }

    /// Replace the configured key pairs with `raw` (`auth:enc,auth:enc`), if given.
    pub fn override_key_pairs(&mut self, raw: Option<&str>) -> KvSessionResult<()> {
        if let Some(raw) = raw {
            self.key_pairs = parse_key_pairs(raw)?;
            tracing::info!(count = self.key_pairs.len(), "Key pairs loaded from environment");
        }
        Ok(())
    }

    /// Check the configuration for errors that would make the store unusable.
    pub fn validate(&self) -> KvSessionResult<()> {
        if self.key_prefix.trim().is_empty() {
            return Err(KvSessionError::Config("key_prefix must not be empty".into()));
        }
        if self.key_pairs.is_empty() {
            return Err(KvSessionError::Config(
                "at least one key pair is required".into(),
            ));
        }
        for pair in &self.key_pairs {
            pair.decode()?;
        }
        Ok(())
    }

    /// Decoded key pairs, primary first.
    pub fn decoded_key_pairs(&self) -> KvSessionResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.key_pairs.iter().map(KeyPairConfig::decode).collect()
    }

    /// Maximum token age.
    pub fn token_max_age(&self) -> Duration {
        Duration::from_secs(self.token_max_age_secs)
    }

    /// Per-call backend deadline, if configured.
    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_ms.map(Duration::from_millis)
    }
}

/// Parse `auth:enc,auth:enc` into key pair configs.
pub fn parse_key_pairs(raw: &str) -> KvSessionResult<Vec<KeyPairConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (auth, enc) = pair.split_once(':').ok_or_else(|| {
                KvSessionError::Config(format!("key pair '{pair}' is not in auth:enc form"))
            })?;
            let cfg = KeyPairConfig {
                auth_key: auth.to_string(),
                enc_key: enc.to_string(),
            };
            cfg.decode()?;
            Ok(cfg)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::SameSite;

    const SAMPLE: &str = r#"
key_prefix = "shop"
backend_timeout_ms = 1500

[cookie]
http_only = true
same_site = "lax"

[[key_pairs]]
auth_key = "00112233"
enc_key = "44556677"

[[key_pairs]]
auth_key = "8899aabb"
enc_key = "ccddeeff"

[backend]
kind = "file"
path = "/tmp/sessions"
"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = StoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.key_prefix, "shop");
        assert_eq!(cfg.key_pairs.len(), 2);
        assert_eq!(cfg.cookie.path, "/");
        assert_eq!(cfg.cookie.max_age, crate::DEFAULT_MAX_AGE);
        assert!(cfg.cookie.http_only);
        assert_eq!(cfg.cookie.same_site, Some(SameSite::Lax));
        assert_eq!(cfg.backend.kind, BackendKind::File);
        assert_eq!(cfg.backend_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(cfg.token_max_age(), Duration::from_secs(2_592_000));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_defaults_for_minimal_config() {
        let cfg = StoreConfig::from_toml_str("key_prefix = \"app\"").unwrap();
        assert!(cfg.key_pairs.is_empty());
        assert_eq!(cfg.backend.kind, BackendKind::Memory);
        assert!(cfg.backend_timeout().is_none());
        // No key pairs is a validation error, not a parse error.
        assert!(matches!(cfg.validate(), Err(KvSessionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_hex() {
        let mut cfg = StoreConfig::from_toml_str(SAMPLE).unwrap();
        cfg.key_pairs[1].enc_key = "not-hex".into();
        assert!(matches!(cfg.validate(), Err(KvSessionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let mut cfg = StoreConfig::from_toml_str(SAMPLE).unwrap();
        cfg.key_prefix = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_key_pairs() {
        let pairs = parse_key_pairs("0011:2233, 4455:6677").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].auth_key, "4455");
        assert!(parse_key_pairs("0011").is_err());
        assert!(parse_key_pairs("zz:0011").is_err());
    }

    #[test]
    fn test_override_key_pairs() {
        let mut cfg = StoreConfig::from_toml_str(SAMPLE).unwrap();
        cfg.override_key_pairs(None).unwrap();
        assert_eq!(cfg.key_pairs.len(), 2);

        cfg.override_key_pairs(Some("abcd:ef01")).unwrap();
        assert_eq!(cfg.key_pairs.len(), 1);
        assert_eq!(cfg.key_pairs[0].auth_key, "abcd");
        assert_eq!(cfg.key_pairs[0].enc_key, "ef01");

        assert!(cfg.override_key_pairs(Some("not-a-pair")).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kvsession.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = StoreConfig::load(&path).unwrap();
        assert_eq!(cfg.decoded_key_pairs().unwrap()[0].0, vec![0x00, 0x11, 0x22, 0x33]);

        let missing = StoreConfig::load(&tmp.path().join("nope.toml"));
        assert!(matches!(missing, Err(KvSessionError::Config(_))));
    }
}
