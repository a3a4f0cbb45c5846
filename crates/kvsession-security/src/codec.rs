use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use kvsession_core::{KvSessionError, KvSessionResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;
/// Tokens stamped further than this in the future are rejected.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Default maximum token age: 30 days.
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(86_400 * 30);

/// An `(authentication, encryption)` key pair.
///
/// Raw keys of any length are accepted; each is hashed with SHA-256 into the
/// 32-byte key actually used for HMAC-SHA256 and AES-256-GCM.
#[derive(Clone)]
pub struct KeyPair {
    auth_key: [u8; 32],
    enc_key: [u8; 32],
}

impl KeyPair {
    /// Derive a key pair from raw key material.
    pub fn new(auth_key: impl AsRef<[u8]>, enc_key: impl AsRef<[u8]>) -> Self {
        Self {
            auth_key: Sha256::digest(auth_key.as_ref()).into(),
            enc_key: Sha256::digest(enc_key.as_ref()).into(),
        }
    }

    fn mac(&self, name: &str, timestamp: &[u8], value: &[u8]) -> KvSessionResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.auth_key)
            .map_err(|e| KvSessionError::Config(format!("invalid HMAC key: {e}")))?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp);
        mac.update(b"|");
        mac.update(value);
        Ok(mac)
    }

    fn encrypt(&self, name: &str, plaintext: &[u8]) -> KvSessionResult<Vec<u8>> {
        let cipher = Aes256Gcm::new((&self.enc_key).into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|e| KvSessionError::Session(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, name: &str, sealed: &[u8]) -> KvSessionResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(KvSessionError::Integrity("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new((&self.enc_key).into());
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| KvSessionError::Integrity("decryption failed".into()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyPair(<redacted>)")
    }
}

/// Seals session identifiers into cookie tokens and back.
///
/// Token layout, before the outer base64url encoding:
///
/// ```text
/// timestamp | base64url(nonce || AES-256-GCM(id, aad = name)) | HMAC-SHA256(name|timestamp|value)
/// ```
///
/// Sealing always uses the first (primary) key pair. Unsealing tries every
/// pair in order, so cookies issued under a demoted key keep working until
/// that key is dropped from the list.
#[derive(Debug, Clone)]
pub struct IdentifierCodec {
    key_pairs: Vec<KeyPair>,
    max_age: Duration,
}

impl IdentifierCodec {
    /// Create a codec from key pairs in rotation order, primary first.
    pub fn new(key_pairs: Vec<KeyPair>) -> KvSessionResult<Self> {
        if key_pairs.is_empty() {
            return Err(KvSessionError::Config(
                "at least one key pair is required".into(),
            ));
        }
        Ok(Self {
            key_pairs,
            max_age: DEFAULT_TOKEN_MAX_AGE,
        })
    }

    /// Create a codec from raw `(auth, enc)` key material.
    pub fn from_raw_pairs(pairs: &[(Vec<u8>, Vec<u8>)]) -> KvSessionResult<Self> {
        Self::new(
            pairs
                .iter()
                .map(|(auth, enc)| KeyPair::new(auth, enc))
                .collect(),
        )
    }

    /// Reject tokens older than `max_age`. `Duration::ZERO` disables the check.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Number of key pairs, primary included.
    pub fn key_count(&self) -> usize {
        self.key_pairs.len()
    }

    /// Seal `identifier` into a token bound to the cookie `name`.
    pub fn seal(&self, name: &str, identifier: &str) -> KvSessionResult<String> {
        self.seal_at(name, identifier, Utc::now().timestamp())
    }

    /// Recover the identifier from a token issued for cookie `name`.
    pub fn unseal(&self, name: &str, token: &str) -> KvSessionResult<String> {
        self.unseal_at(name, token, Utc::now().timestamp())
    }

    pub(crate) fn seal_at(
        &self,
        name: &str,
        identifier: &str,
        timestamp: i64,
    ) -> KvSessionResult<String> {
        let primary = self
            .key_pairs
            .first()
            .ok_or_else(|| KvSessionError::Config("no key pairs configured".into()))?;

        let value = URL_SAFE_NO_PAD.encode(primary.encrypt(name, identifier.as_bytes())?);
        let timestamp = timestamp.to_string();
        let tag = primary
            .mac(name, timestamp.as_bytes(), value.as_bytes())?
            .finalize()
            .into_bytes();

        let mut body = Vec::with_capacity(timestamp.len() + value.len() + MAC_LEN + 2);
        body.extend_from_slice(timestamp.as_bytes());
        body.push(b'|');
        body.extend_from_slice(value.as_bytes());
        body.push(b'|');
        body.extend_from_slice(&tag);
        Ok(URL_SAFE_NO_PAD.encode(body))
    }

    pub(crate) fn unseal_at(&self, name: &str, token: &str, now: i64) -> KvSessionResult<String> {
        let body = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| KvSessionError::Integrity("token is not valid base64".into()))?;

        let mut parts = body.splitn(3, |b| *b == b'|');
        let (raw_ts, value, tag) = match (parts.next(), parts.next(), parts.next()) {
            (Some(ts), Some(value), Some(tag)) if tag.len() == MAC_LEN => (ts, value, tag),
            _ => return Err(KvSessionError::Integrity("token is malformed".into())),
        };
        let timestamp = std::str::from_utf8(raw_ts)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| KvSessionError::Integrity("token timestamp is malformed".into()))?;

        for (index, pair) in self.key_pairs.iter().enumerate() {
            if pair.mac(name, raw_ts, value)?.verify_slice(tag).is_err() {
                continue;
            }
            if index > 0 {
                debug!(key_index = index, "Token validated by a rotated key pair");
            }
            self.check_age(timestamp, now)?;

            let sealed = URL_SAFE_NO_PAD
                .decode(value)
                .map_err(|_| KvSessionError::Integrity("token value is not valid base64".into()))?;
            let plaintext = pair.decrypt(name, &sealed)?;
            return String::from_utf8(plaintext)
                .map_err(|_| KvSessionError::Integrity("identifier is not valid UTF-8".into()));
        }

        Err(KvSessionError::Integrity(
            "token does not validate against any key pair".into(),
        ))
    }

    fn check_age(&self, timestamp: i64, now: i64) -> KvSessionResult<()> {
        if timestamp > now + MAX_CLOCK_SKEW_SECS {
            return Err(KvSessionError::Credential("token timestamp is in the future".into()));
        }
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        if max_age > 0 && timestamp < now.saturating_sub(max_age) {
            return Err(KvSessionError::Credential("token expired".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn codec(keys: &[(&str, &str)]) -> IdentifierCodec {
        IdentifierCodec::new(keys.iter().map(|(a, e)| KeyPair::new(a, e)).collect()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let c = codec(&[("auth-1", "enc-1")]);
        let token = c.seal("sid", "0b6c5a1e-identifier").unwrap();
        assert_eq!(c.unseal("sid", &token).unwrap(), "0b6c5a1e-identifier");
    }

    #[test]
    fn test_seal_is_randomized() {
        let c = codec(&[("auth-1", "enc-1")]);
        let a = c.seal("sid", "same").unwrap();
        let b = c.seal("sid", "same").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains('='));
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_empty_key_list_is_rejected() {
        assert!(matches!(
            IdentifierCodec::new(vec![]),
            Err(KvSessionError::Config(_))
        ));
    }

    #[test]
    fn test_name_binding() {
        let c = codec(&[("auth-1", "enc-1")]);
        let token = c.seal("sid", "abc").unwrap();
        assert!(matches!(
            c.unseal("other", &token),
            Err(KvSessionError::Integrity(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let c = codec(&[("auth-1", "enc-1")]).with_max_age(Duration::from_secs(60));
        let token = c.seal_at("sid", "abc", 1_000).unwrap();
        assert_eq!(c.unseal_at("sid", &token, 1_030).unwrap(), "abc");
        assert!(matches!(
            c.unseal_at("sid", &token, 1_100),
            Err(KvSessionError::Credential(_))
        ));
    }

    #[test]
    fn test_zero_max_age_disables_expiry() {
        let c = codec(&[("auth-1", "enc-1")]).with_max_age(Duration::ZERO);
        let token = c.seal_at("sid", "abc", 1_000).unwrap();
        assert_eq!(c.unseal_at("sid", &token, 1_000_000_000).unwrap(), "abc");
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let c = codec(&[("auth-1", "enc-1")]);
        let token = c.seal_at("sid", "abc", 10_000).unwrap();
        assert!(matches!(
            c.unseal_at("sid", &token, 1_000),
            Err(KvSessionError::Credential(_))
        ));
    }

    #[test]
    fn test_garbage_tokens() {
        let c = codec(&[("auth-1", "enc-1")]);
        for token in ["", "!!!", "bm90IGEgdG9rZW4", "MTIzfGFiY3w"] {
            assert!(
                matches!(c.unseal("sid", token), Err(KvSessionError::Integrity(_))),
                "token {token:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_redacts_keys() {
        let pair = KeyPair::new("secret-auth", "secret-enc");
        assert_eq!(format!("{pair:?}"), "KeyPair(<redacted>)");
    }
}
