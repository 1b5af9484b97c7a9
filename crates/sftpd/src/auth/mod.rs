//! Credential checks for the SSH handshake.
//!
//! Two strategies exist: password (one configured username and
//! password) and public key (an allow-list of keys). Each one is either
//! configured or absent; a connection is authenticated if any configured
//! strategy accepts the presented credential. With no strategy configured
//! every attempt is rejected.
//!
//! # Example
//!
//! ```rust,ignore
//! use sftpd::auth::{AuthorizedKeySet, CredentialAuthority, PasswordVerifier};
//!
//! let authority = CredentialAuthority::new()
//!     .with_password(PasswordVerifier::new("alice", "secret"))
//!     .with_authorized_keys(AuthorizedKeySet::new().add_encoded(key_bytes));
//! ```

mod authorized_keys;
mod context;
mod password;
mod publickey;

pub use authorized_keys::{AuthorizedKey, load_authorized_keys, parse_authorized_keys};
pub use context::{AuthContext, AuthMethod, AuthResult};
pub use password::PasswordVerifier;
pub use publickey::AuthorizedKeySet;

use tracing::debug;

/// Session ID type for tracking authentication attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default authentication rejection delay to mitigate timing attacks.
pub const DEFAULT_AUTH_REJECTION_DELAY_MS: u64 = 100;

/// Default maximum authentication attempts before disconnection.
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 6;

/// Decides accept or reject for one presented credential.
///
/// Built once from configuration and shared read-only by every
/// connection.
#[derive(Debug, Clone, Default)]
pub struct CredentialAuthority {
    password: Option<PasswordVerifier>,
    authorized_keys: Option<AuthorizedKeySet>,
}

impl CredentialAuthority {
    /// Creates an authority with no strategy configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables password authentication.
    pub fn with_password(mut self, verifier: PasswordVerifier) -> Self {
        self.password = Some(verifier);
        self
    }

    /// Enables public key authentication.
    pub fn with_authorized_keys(mut self, keys: AuthorizedKeySet) -> Self {
        self.authorized_keys = Some(keys);
        self
    }

    /// Returns the methods the handshake should advertise.
    pub fn methods(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::with_capacity(2);
        if self.password.is_some() {
            methods.push(AuthMethod::Password);
        }
        if self.authorized_keys.is_some() {
            methods.push(AuthMethod::PublicKey);
        }
        methods
    }

    /// Returns true if no strategy is configured.
    pub fn rejects_everything(&self) -> bool {
        self.password.is_none() && self.authorized_keys.is_none()
    }

    /// Verifies a password attempt.
    pub fn verify_password(&self, ctx: &AuthContext, password: &str) -> AuthResult {
        match &self.password {
            Some(verifier) => verifier.verify(ctx, password),
            None => {
                debug!(username = %ctx.username(), "Password auth not configured");
                AuthResult::reject(format!("password rejected for {:?}", ctx.username()))
            }
        }
    }

    /// Verifies a public key attempt, given the key's wire encoding.
    pub fn verify_public_key(&self, ctx: &AuthContext, encoded: &[u8]) -> AuthResult {
        match &self.authorized_keys {
            Some(keys) => keys.verify(ctx, encoded),
            None => {
                debug!(username = %ctx.username(), "Public key auth not configured");
                AuthResult::reject(format!("key rejected for {:?}", ctx.username()))
            }
        }
    }
}
