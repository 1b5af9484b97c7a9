//! Standalone SFTP server.
//!
//! Configuration comes from the environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `SFTPD_ADDR` | `127.0.0.1:2022` |
//! | `SFTPD_USER` | `admin` |
//! | `SFTPD_PASSWORD` | unset or empty (password auth disabled) |
//! | `SFTPD_ROOT` | current directory |
//! | `SFTPD_AUTHORIZED_KEYS` | unset (public key auth disabled) |
//!
//! ## Running
//!
//! ```bash
//! SFTPD_PASSWORD=secret cargo run --example sftp_server
//! ```
//!
//! Then connect:
//!
//! ```bash
//! sftp -P 2022 -o StrictHostKeyChecking=no admin@localhost
//! # Password: secret
//! ```

use std::env;
use std::time::Duration;

use sftpd::ServerBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), sftpd::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let address = env::var("SFTPD_ADDR").unwrap_or_else(|_| "127.0.0.1:2022".to_string());
    let user = env::var("SFTPD_USER").unwrap_or_else(|_| "admin".to_string());

    let mut builder = ServerBuilder::new()
        .address(address)
        .username(user.clone())
        .idle_timeout(Duration::from_secs(300));

    if let Ok(password) = env::var("SFTPD_PASSWORD") {
        builder = builder.password(password);
    }
    if let Ok(root) = env::var("SFTPD_ROOT") {
        builder = builder.root(root);
    }
    if let Ok(path) = env::var("SFTPD_AUTHORIZED_KEYS") {
        builder = builder.authorized_keys_file(path);
    }

    let server = builder.build()?;
    tracing::info!(
        user = %user,
        root = %server.config().root.display(),
        fingerprint = server.identity().fingerprint(),
        "Starting SFTP server, press Ctrl-C to stop"
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
