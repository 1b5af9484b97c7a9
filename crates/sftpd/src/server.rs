//! Server lifecycle and connection acceptance.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::handler::{RusshConfig, ServerState, SftpHandler, method_set, negotiate};
use crate::identity::ServerIdentity;
use crate::{Error, Result};

/// A bound listener and the task accepting on it.
struct Listening {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// SSH server exposing the SFTP subsystem.
///
/// Created by [`Server::new`] or [`ServerBuilder::build`](crate::ServerBuilder::build),
/// which generate the host identity. [`start`](Self::start) binds and
/// begins accepting; [`stop`](Self::stop) closes the listener and lets
/// in-flight connections finish on their own.
pub struct Server {
    config: ServerConfig,
    identity: Arc<ServerIdentity>,
    state: Arc<ServerState>,
    shutting_down: Arc<AtomicBool>,
    running: Mutex<Option<Listening>>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl Server {
    /// Creates a new server, generating its host identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if the identity cannot be created.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let identity = ServerIdentity::provision(config.host_key)?;
        let authority = Arc::new(config.authority());
        if authority.rejects_everything() {
            warn!("No authentication configured, every connection will be rejected");
        }
        let state = Arc::new(ServerState::new(authority, config.file_transfer_factory()));

        Ok(Self {
            config,
            identity: Arc::new(identity),
            state,
            shutting_down: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        })
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the host identity.
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Returns the configured listen address.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Returns the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|l| l.local_addr)
    }

    /// Returns true while the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Binds the listen address and starts accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound and
    /// [`Error::AlreadyRunning`] if the server is already started. Either
    /// way the server state is unchanged.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let russh_config = Arc::new(self.create_russh_config());
        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|source| Error::Bind {
                address: self.config.address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.shutting_down.store(false, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            russh_config,
            Arc::clone(&self.state),
            Arc::clone(&self.shutting_down),
            shutdown_rx,
        ));
        *running = Some(Listening {
            local_addr,
            shutdown_tx,
            accept_task,
        });

        info!(
            address = %local_addr,
            host_key = self.identity.algorithm(),
            fingerprint = self.identity.fingerprint(),
            "SFTP server listening"
        );
        Ok(local_addr)
    }

    /// Stops accepting connections.
    ///
    /// When this returns the listener is closed. Connections and
    /// subsystem sessions already in flight keep running until their
    /// clients disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if the server is not started.
    pub async fn stop(&self) -> Result<()> {
        let listening = self.running.lock().take();
        let Some(listening) = listening else {
            return Err(Error::NotRunning);
        };

        info!(address = %listening.local_addr, "shutting down SFTP server");
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = listening.shutdown_tx.send(());

        if let Err(e) = listening.accept_task.await {
            error!(error = %e, "Accept loop ended abnormally");
        }
        Ok(())
    }

    /// Starts the server, waits for `signal`, then stops it.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// server.run_until(tokio::signal::ctrl_c()).await?;
    /// ```
    pub async fn run_until<F: Future>(&self, signal: F) -> Result<()> {
        self.start().await?;
        signal.await;
        self.stop().await
    }

    /// Creates the russh server configuration.
    fn create_russh_config(&self) -> RusshConfig {
        let mut config = RusshConfig::default();

        config.server_id = russh::SshId::Standard(self.config.version.clone());
        config.inactivity_timeout = self.config.idle_timeout;
        config.max_auth_attempts = self.config.max_auth_attempts as usize;
        config.auth_rejection_time = Duration::from_millis(self.config.auth_rejection_delay_ms);
        config.methods = method_set(&self.state.authority.methods());
        config.keys.push(self.identity.key_pair().clone());

        config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(listening) = self.running.get_mut().take() {
            self.shutting_down.store(true, Ordering::SeqCst);
            let _ = listening.shutdown_tx.send(());
        }
    }
}

/// Accepts connections until signalled or the listener fails.
async fn accept_loop(
    listener: TcpListener,
    config: Arc<RusshConfig>,
    state: Arc<ServerState>,
    shutting_down: Arc<AtomicBool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("Accept loop stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    info!(peer_addr = %peer_addr, "Accepted connection");
                    let handler = SftpHandler::new(peer_addr, Arc::clone(&state));
                    tokio::spawn(negotiate(Arc::clone(&config), socket, handler));
                }
                Err(e) => {
                    if shutting_down.load(Ordering::SeqCst) {
                        debug!(error = %e, "Accept failed during shutdown");
                    } else {
                        error!(error = %e, "Failed to accept connection");
                    }
                    break;
                }
            }
        }
    }
}
