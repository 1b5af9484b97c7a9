//! Authentication attempt context and verdict types.

use std::net::SocketAddr;

use super::SessionId;

/// Context provided to credential checks.
///
/// Contains information about the authentication attempt including
/// the username, remote address, and session identifier.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The username attempting authentication.
    pub username: String,
    /// The remote address of the client.
    pub remote_addr: SocketAddr,
    /// The session ID for this connection.
    pub session_id: SessionId,
    /// Number of authentication attempts so far.
    pub attempt_count: u32,
}

impl AuthContext {
    /// Creates a new authentication context.
    pub fn new(username: impl Into<String>, remote_addr: SocketAddr, session_id: SessionId) -> Self {
        Self {
            username: username.into(),
            remote_addr,
            session_id,
            attempt_count: 0,
        }
    }

    /// Creates a context with the given attempt count.
    pub fn with_attempt(mut self, count: u32) -> Self {
        self.attempt_count = count;
        self
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns the session ID.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

/// Authentication methods the server can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// Password authentication.
    Password,
    /// Public key authentication.
    PublicKey,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password => write!(f, "password"),
            AuthMethod::PublicKey => write!(f, "publickey"),
        }
    }
}

/// Result of a single credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// The credential was accepted.
    Accept,
    /// The credential was rejected.
    Reject {
        /// Human-readable reason. Names the user, never the secret.
        reason: String,
    },
}

impl AuthResult {
    /// Creates a rejection with the given reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        AuthResult::Reject {
            reason: reason.into(),
        }
    }

    /// Returns true if the credential was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }

    /// Returns true if the credential was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, AuthResult::Reject { .. })
    }

    /// Returns the rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            AuthResult::Accept => None,
            AuthResult::Reject { reason } => Some(reason),
        }
    }
}
