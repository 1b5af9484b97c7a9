//! Ephemeral host identity.
//!
//! Every server proves itself to clients with a freshly generated key
//! pair that lives only in memory. Clients must not pin it: a restart
//! yields a different host key.

use std::fmt;

use russh_keys::PublicKeyBase64;
use russh_keys::key::{KeyPair, SignatureHash};
use tracing::info;

use crate::{Error, Result};

/// Smallest RSA modulus accepted for a host key.
pub const MIN_RSA_BITS: usize = 2048;

/// The kind of host key to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyKind {
    /// RSA with SHA-256 signatures.
    Rsa {
        /// Modulus size; at least [`MIN_RSA_BITS`].
        bits: usize,
    },
    /// Ed25519.
    Ed25519,
}

impl Default for HostKeyKind {
    fn default() -> Self {
        Self::Rsa { bits: MIN_RSA_BITS }
    }
}

impl fmt::Display for HostKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa { bits } => write!(f, "rsa-{bits}"),
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// The signing identity a server presents during the handshake.
pub struct ServerIdentity {
    key_pair: KeyPair,
    public_key: Vec<u8>,
    algorithm: String,
    fingerprint: String,
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("algorithm", &self.algorithm)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl ServerIdentity {
    /// Generates a new identity of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if the key size is too small or
    /// the key pair cannot be generated.
    pub fn provision(kind: HostKeyKind) -> Result<Self> {
        let key_pair = match kind {
            HostKeyKind::Rsa { bits } if bits < MIN_RSA_BITS => {
                return Err(Error::KeyGeneration(format!(
                    "rsa host keys must be at least {MIN_RSA_BITS} bits, got {bits}"
                )));
            }
            HostKeyKind::Rsa { bits } => KeyPair::generate_rsa(bits, SignatureHash::SHA2_256)
                .ok_or_else(|| Error::KeyGeneration(format!("failed to generate {kind} key")))?,
            HostKeyKind::Ed25519 => KeyPair::generate_ed25519(),
        };

        Self::from_key_pair(key_pair)
    }

    /// Wraps an existing key pair.
    pub fn from_key_pair(key_pair: KeyPair) -> Result<Self> {
        let public = key_pair
            .clone_public_key()
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let identity = Self {
            public_key: public.public_key_bytes(),
            algorithm: public.name().to_string(),
            fingerprint: public.fingerprint(),
            key_pair,
        };

        info!(
            algorithm = %identity.algorithm,
            fingerprint = %identity.fingerprint,
            "Provisioned ephemeral host key"
        );
        Ok(identity)
    }

    /// Returns the private key pair used to sign the handshake.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Returns the public key in SSH wire encoding.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Returns the host key algorithm name (e.g. `ssh-ed25519`).
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
