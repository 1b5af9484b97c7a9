//! Server configuration and builder.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use tracing::debug;

use crate::auth::{self, CredentialAuthority, PasswordVerifier, load_authorized_keys};
use crate::identity::HostKeyKind;
use crate::subsystem::{FileTransfer, FileTransferFactory, SftpTransfer};
use crate::{Error, Result, Server};

/// Default SSH identification string.
pub const DEFAULT_VERSION: &str = "SSH-2.0-sftpd";

/// Default listen address.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:2022";

/// Options for configuring the SFTP server.
///
/// Each authentication strategy is enabled by its presence: a non-empty
/// password enables password auth, an authorized key list (even an empty
/// one) enables public key auth. With neither, every attempt is rejected.
#[derive(Clone)]
pub struct ServerConfig {
    /// Listen address (`host:port`).
    pub address: String,
    /// Username required by password auth.
    pub username: String,
    /// Password; enables password auth when set and non-empty.
    pub password: Option<String>,
    /// Authorized key encodings; enables public key auth when set.
    pub authorized_keys: Option<Vec<Vec<u8>>>,
    /// Server version string.
    pub version: String,
    /// Kind of host key generated at construction.
    pub host_key: HostKeyKind,
    /// Idle timeout.
    pub idle_timeout: Option<Duration>,
    /// Maximum authentication attempts before disconnection.
    pub max_auth_attempts: u32,
    /// Authentication rejection delay in milliseconds (timing attack mitigation).
    pub auth_rejection_delay_ms: u64,
    /// Directory served by the default SFTP backend.
    pub root: PathBuf,
    /// Custom file transfer factory; replaces the default SFTP backend.
    pub file_transfer: Option<FileTransferFactory>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            username: String::new(),
            password: None,
            authorized_keys: None,
            version: DEFAULT_VERSION.to_string(),
            host_key: HostKeyKind::default(),
            idle_timeout: None,
            max_auth_attempts: auth::DEFAULT_MAX_AUTH_ATTEMPTS,
            auth_rejection_delay_ms: auth::DEFAULT_AUTH_REJECTION_DELAY_MS,
            root: PathBuf::from("."),
            file_transfer: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "authorized_keys",
                &self.authorized_keys.as_ref().map(Vec::len),
            )
            .field("version", &self.version)
            .field("host_key", &self.host_key)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_auth_attempts", &self.max_auth_attempts)
            .field("auth_rejection_delay_ms", &self.auth_rejection_delay_ms)
            .field("root", &self.root)
            .field("file_transfer", &self.file_transfer.is_some())
            .finish()
    }
}

impl ServerConfig {
    /// Builds the credential authority for this configuration.
    ///
    /// An empty password leaves password authentication disabled.
    pub fn authority(&self) -> CredentialAuthority {
        let mut authority = CredentialAuthority::new();
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            authority =
                authority.with_password(PasswordVerifier::new(self.username.clone(), password));
        }
        if let Some(keys) = &self.authorized_keys {
            authority = authority.with_authorized_keys(keys.iter().cloned().collect());
        }
        authority
    }

    /// Returns the file transfer factory, defaulting to SFTP over `root`.
    pub fn file_transfer_factory(&self) -> FileTransferFactory {
        self.file_transfer
            .clone()
            .unwrap_or_else(|| SftpTransfer::factory(self.root.clone()))
    }
}

/// Builder for creating an SFTP server.
///
/// # Example
///
/// ```rust,ignore
/// use sftpd::ServerBuilder;
///
/// let server = ServerBuilder::new()
///     .address("127.0.0.1:2022")
///     .username("alice")
///     .password("secret")
///     .root("/srv/sftp")
///     .build()?;
/// ```
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    authorized_keys_files: Vec<PathBuf>,
}

impl ServerBuilder {
    /// Creates a new server builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.config.address = addr.into();
        self
    }

    /// Sets the username required by password auth.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Sets the password. A non-empty password enables password auth.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Authorizes a public key and enables public key auth.
    pub fn authorized_key(self, key: &PublicKey) -> Self {
        self.authorized_key_bytes(key.public_key_bytes())
    }

    /// Authorizes a key by its wire encoding and enables public key auth.
    pub fn authorized_key_bytes(mut self, encoded: impl Into<Vec<u8>>) -> Self {
        self.config
            .authorized_keys
            .get_or_insert_with(Vec::new)
            .push(encoded.into());
        self
    }

    /// Authorizes every key in an OpenSSH `authorized_keys` file.
    ///
    /// The file is read by [`build`](Self::build).
    pub fn authorized_keys_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.authorized_keys_files.push(path.into());
        self
    }

    /// Sets the server version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Sets the kind of host key to generate.
    pub fn host_key(mut self, kind: HostKeyKind) -> Self {
        self.config.host_key = kind;
        self
    }

    /// Sets the idle timeout.
    pub fn idle_timeout(mut self, duration: Duration) -> Self {
        self.config.idle_timeout = Some(duration);
        self
    }

    /// Sets the maximum authentication attempts.
    pub fn max_auth_attempts(mut self, max: u32) -> Self {
        self.config.max_auth_attempts = max;
        self
    }

    /// Sets the authentication rejection delay in milliseconds.
    pub fn auth_rejection_delay(mut self, delay_ms: u64) -> Self {
        self.config.auth_rejection_delay_ms = delay_ms;
        self
    }

    /// Sets the directory served by the default SFTP backend.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Replaces the default SFTP backend.
    pub fn file_transfer<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn FileTransfer> + Send + Sync + 'static,
    {
        self.config.file_transfer = Some(Arc::new(factory));
        self
    }

    /// Returns the configuration built so far, without reading key files.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Reads key files and returns the final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a password is set without a
    /// username, and an I/O or key loading error if a key file cannot be
    /// used.
    pub fn into_config(mut self) -> Result<ServerConfig> {
        let password_set = self.config.password.as_deref().is_some_and(|p| !p.is_empty());
        if password_set && self.config.username.is_empty() {
            return Err(Error::Configuration(
                "password auth requires a username".into(),
            ));
        }
        for path in &self.authorized_keys_files {
            let keys = load_authorized_keys(path)?;
            debug!(path = %path.display(), count = keys.len(), "Authorizing keys from file");
            self.config
                .authorized_keys
                .get_or_insert_with(Vec::new)
                .extend(keys.into_iter().map(|key| key.key_bytes));
        }
        Ok(self.config)
    }

    /// Builds the server.
    pub fn build(self) -> Result<Server> {
        Server::new(self.into_config()?)
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("authorized_keys_files", &self.authorized_keys_files)
            .finish()
    }
}
