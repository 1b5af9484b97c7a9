//! Authorized keys file parsing.
//!
//! Parses OpenSSH `authorized_keys` content into wire-encoded keys that
//! can seed an [`AuthorizedKeySet`](super::AuthorizedKeySet).

use std::path::Path;

use russh_keys::PublicKeyBase64;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// An authorized key parsed from an authorized_keys file.
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    /// The key type (e.g., "ssh-ed25519", "ssh-rsa").
    pub key_type: String,
    /// The canonical wire encoding of the key.
    pub key_bytes: Vec<u8>,
    /// Optional comment (usually email or identifier).
    pub comment: Option<String>,
    /// Optional key options (e.g., "no-pty"). Parsed but not enforced.
    pub options: Vec<String>,
}

// Key types we recognize at the start of a line.
const KEY_TYPES: &[&str] = &[
    "ssh-ed25519",
    "ssh-rsa",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// Parses authorized_keys content and returns the keys.
///
/// # Format
///
/// ```text
/// [options] key-type base64-data [comment]
/// ```
///
/// Empty lines and `#` comments are skipped, as are lines whose key
/// cannot be decoded.
pub fn parse_authorized_keys(content: &str) -> Vec<AuthorizedKey> {
    parse_lines(content).0
}

/// Reads and parses an authorized_keys file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, and
/// [`Error::KeyLoad`] if it has key lines but none of them decode.
pub fn load_authorized_keys(path: impl AsRef<Path>) -> Result<Vec<AuthorizedKey>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let (keys, decode_error) = parse_lines(&content);
    if let (true, Some(e)) = (keys.is_empty(), decode_error) {
        warn!(path = %path.display(), error = %e, "No usable keys in authorized_keys file");
        return Err(Error::KeyLoad(e));
    }
    info!(
        path = %path.display(),
        count = keys.len(),
        "Loaded authorized keys"
    );
    Ok(keys)
}

// Returns the decoded keys and the last decode error, if any.
fn parse_lines(content: &str) -> (Vec<AuthorizedKey>, Option<russh_keys::Error>) {
    let mut keys = Vec::new();
    let mut decode_error = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_authorized_key_line(line) {
            Some(Ok(key)) => keys.push(key),
            Some(Err(e)) => {
                debug!(error = %e, line = %line, "Failed to decode key data");
                decode_error = Some(e);
            }
            None => debug!(line = %line, "Failed to parse authorized_keys line"),
        }
    }

    (keys, decode_error)
}

type LineResult = std::result::Result<AuthorizedKey, russh_keys::Error>;

fn parse_authorized_key_line(line: &str) -> Option<LineResult> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let first = parts.next()?;

    if KEY_TYPES.contains(&first) {
        parse_key_parts(first, parts.next().unwrap_or(""), Vec::new())
    } else {
        let rest = parts.next()?.trim_start();
        let options = first.split(',').map(str::to_string).collect();

        let mut rest_parts = rest.splitn(2, char::is_whitespace);
        let key_type = rest_parts.next()?;
        if !KEY_TYPES.contains(&key_type) {
            return None;
        }

        parse_key_parts(key_type, rest_parts.next().unwrap_or(""), options)
    }
}

fn parse_key_parts(key_type: &str, rest: &str, options: Vec<String>) -> Option<LineResult> {
    let mut parts = rest.trim().splitn(2, char::is_whitespace);
    let key_data = parts.next().filter(|data| !data.is_empty())?;

    Some(
        russh_keys::parse_public_key_base64(key_data).map(|key| AuthorizedKey {
            key_type: key_type.to_string(),
            key_bytes: key.public_key_bytes(),
            comment: parts.next().map(|s| s.trim().to_string()),
            options,
        }),
    )
}
