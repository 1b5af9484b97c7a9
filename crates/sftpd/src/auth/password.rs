//! Password verification.

use std::fmt;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::context::{AuthContext, AuthResult};

/// Checks a presented username and password against the configured pair.
///
/// Both values are compared as opaque bytes through their SHA-256
/// digests, so neither the position of the first differing byte nor the
/// length of the secret affects timing. The username and the password
/// are always both evaluated.
#[derive(Clone)]
pub struct PasswordVerifier {
    username: String,
    password_digest: [u8; 32],
}

impl fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordVerifier")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl PasswordVerifier {
    /// Creates a verifier for the given credentials.
    pub fn new(username: impl Into<String>, password: impl AsRef<[u8]>) -> Self {
        Self {
            username: username.into(),
            password_digest: digest(password.as_ref()),
        }
    }

    /// Returns the configured username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Verifies a password attempt.
    pub fn verify(&self, ctx: &AuthContext, password: &str) -> AuthResult {
        let user_ok = digest(ctx.username().as_bytes()).ct_eq(&digest(self.username.as_bytes()));
        let password_ok = digest(password.as_bytes()).ct_eq(&self.password_digest);

        if bool::from(user_ok & password_ok) {
            debug!(
                username = %ctx.username(),
                remote_addr = %ctx.remote_addr(),
                session_id = %ctx.session_id(),
                attempt = ctx.attempt_count(),
                "PasswordVerifier: accepted"
            );
            AuthResult::Accept
        } else {
            debug!(
                username = %ctx.username(),
                remote_addr = %ctx.remote_addr(),
                session_id = %ctx.session_id(),
                attempt = ctx.attempt_count(),
                "PasswordVerifier: rejected"
            );
            AuthResult::reject(format!("password rejected for {:?}", ctx.username()))
        }
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}
