//! russh Handler implementation for the SFTP server.
//!
//! This module implements the `russh::server::Handler` trait: it checks
//! credentials against the [`CredentialAuthority`], accepts only `session`
//! channels, and hands each `sftp` subsystem request to the session runner.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use russh::server::{Auth, Handle, Handler as RusshHandler, Msg, Session as RusshSession};
use russh::{Channel, ChannelId, MethodSet};
use russh_keys::PublicKeyBase64;
use tokio::net::TcpStream;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::{AuthContext, AuthMethod, AuthResult, CredentialAuthority, SessionId};
use crate::subsystem::{ChannelCloser, FileTransferFactory, SFTP_SUBSYSTEM, run_session};
use crate::{Error, Result};

pub(crate) use russh::server::{Config as RusshConfig, run_stream};

/// Shared state for all connections to a server.
pub(crate) struct ServerState {
    /// Credential checks, shared read-only.
    pub authority: Arc<CredentialAuthority>,
    /// Creates one file transfer per subsystem session.
    pub file_transfer: FileTransferFactory,
    /// Connection counter for generating IDs.
    pub connection_counter: RwLock<u64>,
}

impl ServerState {
    /// Creates new server state.
    pub fn new(authority: Arc<CredentialAuthority>, file_transfer: FileTransferFactory) -> Self {
        Self {
            authority,
            file_transfer,
            connection_counter: RwLock::new(0),
        }
    }

    /// Returns the next connection ID.
    pub fn next_connection_id(&self) -> u64 {
        let mut counter = self.connection_counter.write();
        *counter += 1;
        *counter
    }
}

/// Converts the enabled methods into the set advertised by russh.
pub(crate) fn method_set(methods: &[AuthMethod]) -> MethodSet {
    let mut set = MethodSet::empty();
    for method in methods {
        set |= match method {
            AuthMethod::Password => MethodSet::PASSWORD,
            AuthMethod::PublicKey => MethodSet::PUBLICKEY,
        };
    }
    set
}

/// Per-channel state tracking.
struct ChannelSlot {
    /// The channel, until a subsystem takes it.
    channel: Option<Channel<Msg>>,
}

/// Handler for a single SSH connection.
pub(crate) struct SftpHandler {
    /// Connection ID for logging.
    connection_id: u64,
    /// Remote address.
    remote_addr: SocketAddr,
    /// User after authentication.
    user: Option<String>,
    /// Server-level shared state.
    server_state: Arc<ServerState>,
    /// Open session channels.
    channels: HashMap<ChannelId, ChannelSlot>,
    /// Authentication attempts for this connection.
    auth_attempts: u32,
}

impl SftpHandler {
    /// Creates a new handler for a connection.
    pub fn new(remote_addr: SocketAddr, server_state: Arc<ServerState>) -> Self {
        let connection_id = server_state.next_connection_id();
        debug!(
            connection_id,
            remote_addr = %remote_addr,
            "New connection handler created"
        );

        Self {
            connection_id,
            remote_addr,
            user: None,
            server_state,
            channels: HashMap::new(),
            auth_attempts: 0,
        }
    }

    fn next_auth_context(&mut self, user: &str) -> AuthContext {
        self.auth_attempts = self.auth_attempts.saturating_add(1);
        AuthContext::new(user, self.remote_addr, SessionId(self.connection_id))
            .with_attempt(self.auth_attempts)
    }

    fn finish_auth(&mut self, method: AuthMethod, user: &str, result: AuthResult) -> Auth {
        match result {
            AuthResult::Accept => {
                info!(
                    connection_id = self.connection_id,
                    user = user,
                    method = %method,
                    "Authentication accepted"
                );
                self.user = Some(user.to_string());
                Auth::Accept
            }
            AuthResult::Reject { reason } => {
                warn!(
                    connection_id = self.connection_id,
                    method = %method,
                    reason = %reason,
                    attempt = self.auth_attempts,
                    "Authentication rejected"
                );
                Auth::Reject {
                    proceed_with_methods: None,
                }
            }
        }
    }

    fn reject_request(&self, channel: ChannelId, request: &str, session: &mut RusshSession) {
        debug!(
            connection_id = self.connection_id,
            channel = ?channel,
            request,
            "Rejecting channel request"
        );
        session.channel_failure(channel);
    }

    fn reject_channel(&self, kind: &str) -> bool {
        debug!(
            connection_id = self.connection_id,
            channel_type = kind,
            "Rejecting non-session channel open"
        );
        false
    }
}

#[async_trait]
impl RusshHandler for SftpHandler {
    type Error = Error;

    /// Handle "none" authentication; never accepted.
    async fn auth_none(&mut self, user: &str) -> std::result::Result<Auth, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            user = user,
            "None auth attempt"
        );
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    /// Handle password authentication.
    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            user = user,
            "Password auth attempt"
        );

        let ctx = self.next_auth_context(user);
        let result = self.server_state.authority.verify_password(&ctx, password);
        Ok(self.finish_auth(AuthMethod::Password, user, result))
    }

    /// Handle public key authentication.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            user = user,
            key_type = public_key.name(),
            "Public key auth attempt"
        );

        let ctx = self.next_auth_context(user);
        let result = self
            .server_state
            .authority
            .verify_public_key(&ctx, &public_key.public_key_bytes());
        Ok(self.finish_auth(AuthMethod::PublicKey, user, result))
    }

    /// Handle new session channel.
    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut RusshSession,
    ) -> std::result::Result<bool, Self::Error> {
        let channel_id = channel.id();
        debug!(
            connection_id = self.connection_id,
            channel = ?channel_id,
            user = self.user.as_deref().unwrap_or_default(),
            "Session channel opened"
        );

        self.channels.insert(
            channel_id,
            ChannelSlot {
                channel: Some(channel),
            },
        );
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut RusshSession,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.reject_channel("direct-tcpip"))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut RusshSession,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.reject_channel("forwarded-tcpip"))
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut RusshSession,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.reject_channel("x11"))
    }

    /// Handle subsystem request.
    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        debug!(
            connection_id = self.connection_id,
            channel = ?channel,
            subsystem = name,
            "Subsystem request"
        );

        if name != SFTP_SUBSYSTEM {
            self.reject_request(channel, "subsystem", session);
            return Ok(());
        }

        let Some(slot) = self.channels.get_mut(&channel) else {
            self.reject_request(channel, "subsystem", session);
            return Ok(());
        };
        let Some(ssh_channel) = slot.channel.take() else {
            warn!(
                connection_id = self.connection_id,
                channel = ?channel,
                "Subsystem already started"
            );
            session.channel_failure(channel);
            return Ok(());
        };
        session.channel_success(channel);

        let transfer = (self.server_state.file_transfer)();
        let closer = RusshChannelCloser {
            handle: session.handle(),
            channel,
        };
        let connection_id = self.connection_id;
        let span = info_span!("subsystem", connection_id, channel = ?channel, subsystem = name);

        tokio::spawn(
            async move {
                debug!("Starting subsystem session");
                let outcome =
                    run_session(transfer, Box::new(ssh_channel.into_stream()), Box::new(closer))
                        .await;
                debug!(outcome = ?outcome, "Subsystem session completed");
            }
            .instrument(span),
        );

        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        self.reject_request(channel, "pty-req", session);
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        self.reject_request(channel, "x11-req", session);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        self.reject_request(channel, "env", session);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        self.reject_request(channel, "shell", session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        self.reject_request(channel, "exec", session);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut RusshSession,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            address,
            port = *port,
            "Discarding tcpip-forward request"
        );
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut RusshSession,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            address,
            port,
            "Discarding cancel-tcpip-forward request"
        );
        Ok(false)
    }

    /// Handle channel EOF.
    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        debug!(
            connection_id = self.connection_id,
            channel = ?channel,
            "Channel EOF"
        );
        Ok(())
    }

    /// Handle channel close.
    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut RusshSession,
    ) -> std::result::Result<(), Self::Error> {
        debug!(
            connection_id = self.connection_id,
            channel = ?channel,
            "Channel closed"
        );

        self.channels.remove(&channel);
        Ok(())
    }
}

/// Closes a subsystem channel through the connection handle.
struct RusshChannelCloser {
    handle: Handle,
    channel: ChannelId,
}

#[async_trait]
impl ChannelCloser for RusshChannelCloser {
    async fn close(&self) -> Result<()> {
        if self.handle.close(self.channel).await.is_err() {
            // The connection is already gone, so the channel is too.
            debug!(channel = ?self.channel, "Connection closed before channel close");
        }
        Ok(())
    }
}

/// Runs the SSH handshake and the connection's event loop to completion.
pub(crate) async fn negotiate(config: Arc<RusshConfig>, socket: TcpStream, handler: SftpHandler) {
    let span = info_span!(
        "connection",
        connection_id = handler.connection_id,
        remote_addr = %handler.remote_addr
    );

    async move {
        debug!("Running SSH session");
        match run_stream(config, socket, handler).await {
            Ok(session) => match session.await {
                Ok(()) => debug!("Connection closed cleanly"),
                Err(e) => warn!(error = %e, "Connection error"),
            },
            Err(e) => warn!(error = %e, "SSH handshake failed"),
        }
    }
    .instrument(span)
    .await;
}
