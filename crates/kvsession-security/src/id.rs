use kvsession_core::{KvSessionError, KvSessionResult};
use uuid::Uuid;

/// Generate a new session identifier.
///
/// A random (v4) UUID in hyphenated form. No collision check is made against
/// the backend; with 122 random bits a clash is not a practical concern.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fill `len` bytes from the operating system CSPRNG.
pub fn random_key(len: usize) -> KvSessionResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf)
        .map_err(|e| KvSessionError::Config(format!("OS random source unavailable: {e}")))?;
    Ok(buf)
}
