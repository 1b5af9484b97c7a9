//! Public key allow-listing.

use std::collections::HashSet;

use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use tracing::debug;

use super::context::{AuthContext, AuthResult};

/// A set of authorized public keys.
///
/// Keys are stored by their canonical SSH wire encoding, so membership is
/// an exact byte match: the same key with a different comment matches,
/// a different key of the same type does not.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeySet {
    keys: HashSet<Vec<u8>>,
}

impl AuthorizedKeySet {
    /// Creates an empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key by its wire encoding.
    pub fn add_encoded(mut self, encoded: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(encoded.into());
        self
    }

    /// Adds a parsed public key.
    pub fn add_key(self, key: &PublicKey) -> Self {
        self.add_encoded(key.public_key_bytes())
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no keys are authorized.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns true if the encoding is in the set.
    pub fn contains(&self, encoded: &[u8]) -> bool {
        self.keys.contains(encoded)
    }

    /// Verifies a public key attempt.
    ///
    /// The presented username is not consulted: the key alone is the
    /// trust anchor.
    pub fn verify(&self, ctx: &AuthContext, encoded: &[u8]) -> AuthResult {
        if self.contains(encoded) {
            debug!(
                username = %ctx.username(),
                remote_addr = %ctx.remote_addr(),
                session_id = %ctx.session_id(),
                "AuthorizedKeySet: accepted"
            );
            AuthResult::Accept
        } else {
            debug!(
                username = %ctx.username(),
                remote_addr = %ctx.remote_addr(),
                session_id = %ctx.session_id(),
                attempt = ctx.attempt_count(),
                key_count = self.keys.len(),
                "AuthorizedKeySet: no matching key"
            );
            AuthResult::reject(format!("key rejected for {:?}", ctx.username()))
        }
    }
}

impl FromIterator<Vec<u8>> for AuthorizedKeySet {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
