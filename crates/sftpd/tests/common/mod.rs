#![allow(dead_code)] // Each test binary uses a different subset of helpers.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{Channel, ChannelMsg};
use russh_keys::key::{KeyPair, PublicKey};
use russh_sftp::client::SftpSession;
use sftpd::{HostKeyKind, Server, ServerBuilder};
use tempfile::TempDir;
use tokio::time::timeout;

pub const TEST_USER: &str = "alice";
pub const TEST_PASSWORD: &str = "secret";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder preset for fast local servers.
pub fn test_builder() -> ServerBuilder {
    ServerBuilder::new()
        .address("127.0.0.1:0")
        .host_key(HostKeyKind::Ed25519)
        .auth_rejection_delay(0)
}

/// Builder preset with password auth for the test user.
pub fn password_builder() -> ServerBuilder {
    test_builder().username(TEST_USER).password(TEST_PASSWORD)
}

pub struct TestServer {
    server: Server,
    addr: SocketAddr,
    root: TempDir,
}

impl TestServer {
    /// Starts a server serving a fresh temporary directory.
    pub async fn start(builder: ServerBuilder) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let server = builder
            .root(root.path())
            .build()
            .expect("build sftpd server");
        let addr = server.start().await.expect("start sftpd server");

        Self { server, addr, root }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub async fn stop(&self) {
        self.server.stop().await.expect("stop sftpd server");
    }
}

/// Client handler that trusts any host key.
pub struct TestClient;

#[async_trait]
impl client::Handler for TestClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub type ClientHandle = client::Handle<TestClient>;

pub async fn connect(addr: SocketAddr) -> ClientHandle {
    let config = Arc::new(client::Config::default());
    timeout(DEFAULT_TIMEOUT, client::connect(config, addr, TestClient))
        .await
        .expect("connect timed out")
        .expect("ssh connect")
}

pub async fn try_password(addr: SocketAddr, user: &str, password: &str) -> (ClientHandle, bool) {
    let mut handle = connect(addr).await;
    let accepted = timeout(DEFAULT_TIMEOUT, handle.authenticate_password(user, password))
        .await
        .expect("password auth timed out")
        .expect("password auth");
    (handle, accepted)
}

pub async fn try_public_key(addr: SocketAddr, user: &str, key: KeyPair) -> (ClientHandle, bool) {
    let mut handle = connect(addr).await;
    let accepted = timeout(
        DEFAULT_TIMEOUT,
        handle.authenticate_publickey(user, Arc::new(key)),
    )
    .await
    .expect("public key auth timed out")
    .expect("public key auth");
    (handle, accepted)
}

/// Connects and authenticates as the test user.
pub async fn login(addr: SocketAddr) -> ClientHandle {
    let (handle, accepted) = try_password(addr, TEST_USER, TEST_PASSWORD).await;
    assert!(accepted, "test user should authenticate");
    handle
}

/// Opens a session channel and starts an SFTP client on it.
pub async fn open_sftp(handle: &ClientHandle) -> SftpSession {
    let channel = handle
        .channel_open_session()
        .await
        .expect("open session channel");
    channel
        .request_subsystem(true, "sftp")
        .await
        .expect("request sftp subsystem");

    timeout(DEFAULT_TIMEOUT, SftpSession::new(channel.into_stream()))
        .await
        .expect("sftp init timed out")
        .expect("sftp session")
}

/// Waits for the next success or failure reply on a channel.
pub async fn wait_for_reply(channel: &mut Channel<Msg>) -> Option<ChannelMsg> {
    timeout(DEFAULT_TIMEOUT, async {
        while let Some(msg) = channel.wait().await {
            if matches!(msg, ChannelMsg::Success | ChannelMsg::Failure) {
                return Some(msg);
            }
        }
        None
    })
    .await
    .expect("channel reply timed out")
}

/// Writes a remote file through the SFTP client.
pub async fn upload(sftp: &SftpSession, path: &str, contents: &[u8]) {
    use tokio::io::AsyncWriteExt;

    let mut file = sftp.create(path).await.expect("create remote file");
    file.write_all(contents).await.expect("write remote file");
    file.shutdown().await.expect("close remote file");
}

/// Reads a remote file through the SFTP client.
pub async fn download(sftp: &SftpSession, path: &str) -> Vec<u8> {
    use tokio::io::AsyncReadExt;

    let mut file = sftp.open(path).await.expect("open remote file");
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .await
        .expect("read remote file");
    contents
}
