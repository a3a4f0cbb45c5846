//! Security primitives for kvsession.
//!
//! Turns session identifiers into opaque cookie tokens and back. Tokens are
//! encrypted, authenticated, timestamped and bound to the cookie name, and
//! can be verified against a rotating list of key pairs.
//!
//! # Main types
//!
//! - [`KeyPair`]: An `(authentication, encryption)` key pair.
//! - [`IdentifierCodec`]: Seals and unseals identifiers with rotating key pairs.
//! - [`generate_session_id`]: Fresh unguessable session identifiers.

/// Sealed cookie token codec.
pub mod codec;
/// Identifier and key material generation.
pub mod id;

pub use codec::{IdentifierCodec, KeyPair, DEFAULT_TOKEN_MAX_AGE};
pub use id::{generate_session_id, random_key};
