#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Property tests for the identifier codec: round-trip, key rotation and
//! tamper rejection.

use kvsession_core::KvSessionError;
use kvsession_security::{generate_session_id, IdentifierCodec, KeyPair};

fn k0() -> KeyPair {
    KeyPair::new("primary-auth-key", "primary-enc-key")
}

fn k1() -> KeyPair {
    KeyPair::new("next-auth-key", "next-enc-key")
}

// --- Round-trip ---

#[test]
fn test_round_trip_many_identifiers() {
    let codec = IdentifierCodec::new(vec![k0()]).unwrap();
    let mut identifiers: Vec<String> = (0..50).map(|_| generate_session_id()).collect();
    identifiers.push(String::new());
    identifiers.push("with|pipes|inside".to_string());
    identifiers.push("ünïcødé-id".to_string());

    for id in &identifiers {
        let token = codec.seal("sid", id).unwrap();
        assert_eq!(&codec.unseal("sid", &token).unwrap(), id);
    }
}

#[test]
fn test_raw_pairs_match_key_pairs() {
    let raw = IdentifierCodec::from_raw_pairs(&[(
        b"primary-auth-key".to_vec(),
        b"primary-enc-key".to_vec(),
    )])
    .unwrap();
    let typed = IdentifierCodec::new(vec![k0()]).unwrap();

    let token = raw.seal("sid", "abc").unwrap();
    assert_eq!(typed.unseal("sid", &token).unwrap(), "abc");
}

// --- Rotation ---

#[test]
fn test_rotation_accepts_demoted_key() {
    let old = IdentifierCodec::new(vec![k0()]).unwrap();
    let token = old.seal("sid", "session-1").unwrap();

    let rotated = IdentifierCodec::new(vec![k1(), k0()]).unwrap();
    assert_eq!(rotated.key_count(), 2);
    assert_eq!(rotated.unseal("sid", &token).unwrap(), "session-1");

    // New tokens are sealed with the new primary only.
    let fresh = rotated.seal("sid", "session-2").unwrap();
    assert!(matches!(
        old.unseal("sid", &fresh),
        Err(KvSessionError::Integrity(_))
    ));
}

#[test]
fn test_retired_key_is_rejected() {
    let old = IdentifierCodec::new(vec![k0()]).unwrap();
    let token = old.seal("sid", "session-1").unwrap();

    let retired = IdentifierCodec::new(vec![k1()]).unwrap();
    assert!(matches!(
        retired.unseal("sid", &token),
        Err(KvSessionError::Integrity(_))
    ));
}

#[test]
fn test_auth_key_alone_is_not_enough() {
    let codec = IdentifierCodec::new(vec![k0()]).unwrap();
    let token = codec.seal("sid", "session-1").unwrap();

    let wrong_enc = IdentifierCodec::new(vec![KeyPair::new("primary-auth-key", "other-enc")]).unwrap();
    assert!(matches!(
        wrong_enc.unseal("sid", &token),
        Err(KvSessionError::Integrity(_))
    ));
}

// --- Tamper rejection ---

#[test]
fn test_every_single_byte_flip_is_rejected() {
    let codec = IdentifierCodec::new(vec![k0()]).unwrap();
    let rotated = IdentifierCodec::new(vec![k1(), k0()]).unwrap();
    let token = codec.seal("sid", &generate_session_id()).unwrap();

    for i in 0..token.len() {
        let mut bytes = token.clone().into_bytes();
        bytes[i] ^= 0x01;
        let tampered = String::from_utf8(bytes).unwrap();

        for c in [&codec, &rotated] {
            assert!(
                matches!(c.unseal("sid", &tampered), Err(KvSessionError::Integrity(_))),
                "flip at byte {i} was accepted"
            );
        }
    }
}

#[test]
fn test_truncated_token_is_rejected() {
    let codec = IdentifierCodec::new(vec![k0()]).unwrap();
    let token = codec.seal("sid", "abc").unwrap();
    let truncated = &token[..token.len() - 4];
    assert!(matches!(
        codec.unseal("sid", truncated),
        Err(KvSessionError::Integrity(_))
    ));
}
