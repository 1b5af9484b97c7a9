#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::doc_markdown)]
#![allow(clippy::nursery)]
#![allow(clippy::pedantic)]

//! # sftpd
//!
//! An embeddable SSH server that exposes the SFTP subsystem.
//!
//! Every authenticated connection may open `session` channels and
//! request the `sftp` subsystem on them; each such channel is bridged
//! to its own file-transfer session, which is torn down deterministically
//! when the client goes away.
//!
//! ## Features
//!
//! - **Password auth**: a single configured username and password,
//!   compared in constant time
//! - **Public key auth**: an allow-list of SSH public keys
//! - **Ephemeral host identity**: generated in memory for every server
//! - **Graceful stop**: the listener closes, in-flight sessions drain
//!
//! ## Example
//!
//! ```rust,ignore
//! use sftpd::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sftpd::Error> {
//!     let server = ServerBuilder::new()
//!         .address("127.0.0.1:2022")
//!         .username("alice")
//!         .password("secret")
//!         .build()?;
//!
//!     server.run_until(tokio::signal::ctrl_c()).await
//! }
//! ```

use std::io;

use thiserror::Error;

pub mod auth;
pub mod config;
mod handler;
pub mod identity;
mod server;
pub mod subsystem;

pub use auth::{
    AuthContext, AuthMethod, AuthResult, AuthorizedKey, AuthorizedKeySet, CredentialAuthority,
    PasswordVerifier, SessionId, parse_authorized_keys,
};
pub use config::{ServerBuilder, ServerConfig};
pub use identity::{HostKeyKind, ServerIdentity};
pub use server::Server;
pub use subsystem::{
    BoxedStream, ChannelCloser, DuplexStream, FileTransfer, FileTransferFactory, LocalFs,
    SFTP_SUBSYSTEM, SessionOutcome, SftpTransfer, run_session,
};

// -----------------------------------------------------------------------------
// Error Types
// -----------------------------------------------------------------------------

/// Errors that can occur in the sftpd server library.
///
/// # Recovery Strategies
///
/// | Error Variant | Recovery Strategy |
/// |--------------|-------------------|
/// | [`Io`](Error::Io) | Check permissions and the served root |
/// | [`Bind`](Error::Bind) | Pick another address or free the port |
/// | [`KeyGeneration`](Error::KeyGeneration) | Choose a supported host key kind |
/// | [`Russh`](Error::Russh) | Check SSH protocol compatibility |
/// | [`KeyLoad`](Error::KeyLoad) | Verify the authorized key format |
/// | [`Configuration`](Error::Configuration) | Fix server configuration |
/// | [`NotRunning`](Error::NotRunning) | Nothing to stop |
/// | [`AlreadyRunning`](Error::AlreadyRunning) | Stop before starting again |
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during server operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The listener could not be bound.
    ///
    /// Commonly occurs when:
    /// - The address is already in use
    /// - Permission denied on privileged ports
    /// - The address does not resolve
    #[error("failed to listen for connection on {address}: {source}")]
    Bind {
        /// The configured listen address.
        address: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The host identity could not be generated.
    ///
    /// The server refuses to exist without an identity to prove itself.
    #[error("key generation error: {0}")]
    KeyGeneration(String),

    /// Underlying russh library error.
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),

    /// Key decoding error from russh-keys.
    ///
    /// Returned when an authorized_keys file has key lines but none of
    /// them decode.
    #[error("key loading error: {0}")]
    KeyLoad(#[from] russh_keys::Error),

    /// Server configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `stop` was called on a server that is not listening.
    #[error("server is not running")]
    NotRunning,

    /// `start` was called on a server that is already listening.
    #[error("server is already running")]
    AlreadyRunning,
}

/// A specialized [`Result`] type for sftpd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Commonly used types.
pub mod prelude {
    pub use crate::auth::{AuthContext, AuthMethod, AuthResult};
    pub use crate::subsystem::{FileTransfer, SftpTransfer};
    pub use crate::{Error, HostKeyKind, Result, Server, ServerBuilder, ServerConfig};
}
