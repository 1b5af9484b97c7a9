use std::sync::Arc;
use std::time::Duration;

use sftpd::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use super::common::{
    DEFAULT_TIMEOUT, TEST_PASSWORD, TEST_USER, TestClient, TestServer, download, login,
    open_sftp, password_builder, test_builder, upload,
};

#[tokio::test]
async fn test_stop_refuses_new_connections_but_keeps_sessions() {
    let server = TestServer::start(password_builder()).await;
    let handle = login(server.addr()).await;
    let sftp = open_sftp(&handle).await;
    upload(&sftp, "/before.txt", b"before stop").await;

    server.stop().await;
    assert!(!server.server().is_running());

    assert!(
        TcpStream::connect(server.addr()).await.is_err(),
        "listener must be closed after stop"
    );

    // The in-flight session keeps working.
    upload(&sftp, "/after.txt", b"after stop").await;
    assert_eq!(download(&sftp, "/before.txt").await, b"before stop");
    assert_eq!(download(&sftp, "/after.txt").await, b"after stop");
}

#[tokio::test]
async fn test_stop_lets_pending_handshake_complete() {
    let server = TestServer::start(password_builder()).await;
    let socket = TcpStream::connect(server.addr()).await.expect("tcp connect");

    // The server banner proves the connection was accepted.
    let mut banner = [0u8; 4];
    let read = tokio::time::timeout(DEFAULT_TIMEOUT, socket.peek(&mut banner))
        .await
        .expect("banner timed out")
        .expect("peek banner");
    assert!(read > 0 && b"SSH-".starts_with(&banner[..read]));

    server.stop().await;
    assert!(TcpStream::connect(server.addr()).await.is_err());

    let config = Arc::new(russh::client::Config::default());
    let mut handle = tokio::time::timeout(
        DEFAULT_TIMEOUT,
        russh::client::connect_stream(config, socket, TestClient),
    )
    .await
    .expect("handshake timed out")
    .expect("handshake after stop");
    let accepted = handle
        .authenticate_password(TEST_USER, TEST_PASSWORD)
        .await
        .expect("password auth");
    assert!(accepted, "pending connection should authenticate after stop");

    let sftp = open_sftp(&handle).await;
    upload(&sftp, "/late.txt", b"accepted before stop").await;
    assert_eq!(
        std::fs::read(server.root().join("late.txt")).expect("file on disk"),
        b"accepted before stop"
    );
}

#[tokio::test]
async fn test_stop_twice_reports_not_running() {
    let server = TestServer::start(password_builder()).await;
    server.stop().await;

    assert!(matches!(
        server.server().stop().await,
        Err(Error::NotRunning)
    ));
}

#[tokio::test]
async fn test_bind_failure_is_synchronous() {
    let holder = TestServer::start(password_builder()).await;
    let taken = holder.addr().to_string();

    let server = test_builder()
        .address(&taken)
        .username("alice")
        .password("secret")
        .build()
        .expect("build");

    let err = server.start().await.expect_err("port is taken");
    assert!(matches!(err, Error::Bind { .. }));
    assert!(err.to_string().contains(&taken));
    assert!(!server.is_running());

    holder.stop().await;
}

#[tokio::test]
async fn test_run_until_signal() {
    let root = tempfile::tempdir().expect("tempdir");
    let server = Arc::new(
        password_builder()
            .root(root.path())
            .build()
            .expect("build"),
    );
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let running = Arc::clone(&server);
    let task = tokio::spawn(async move {
        running
            .run_until(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    let mut addr = None;
    for _ in 0..100 {
        if let Some(bound) = server.local_addr() {
            addr = Some(bound);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let addr = addr.expect("server should start");

    let handle = login(addr).await;
    open_sftp(&handle).await;

    stop_tx.send(()).expect("signal");
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run_until should return")
        .expect("task")
        .expect("run_until result");

    assert!(!server.is_running());
    assert!(TcpStream::connect(addr).await.is_err());
}
