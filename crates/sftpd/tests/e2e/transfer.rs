use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sftpd::{BoxedStream, FileTransfer, SftpTransfer};

use super::common::{
    DEFAULT_TIMEOUT, TestServer, download, login, open_sftp, password_builder, upload,
};

#[tokio::test]
async fn test_upload_then_download() {
    let server = TestServer::start(password_builder()).await;
    let handle = login(server.addr()).await;
    let sftp = open_sftp(&handle).await;

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    upload(&sftp, "/data.bin", &payload).await;

    assert_eq!(
        std::fs::read(server.root().join("data.bin")).expect("file on disk"),
        payload
    );
    assert_eq!(download(&sftp, "/data.bin").await, payload);

    server.stop().await;
}

#[tokio::test]
async fn test_directory_operations() {
    let server = TestServer::start(password_builder()).await;
    std::fs::write(server.root().join("existing.txt"), b"x").expect("seed file");

    let handle = login(server.addr()).await;
    let sftp = open_sftp(&handle).await;

    sftp.create_dir("/nested").await.expect("mkdir");
    upload(&sftp, "/nested/inner.txt", b"inner").await;

    let mut names: Vec<String> = sftp
        .read_dir("/")
        .await
        .expect("readdir")
        .map(|entry| entry.file_name())
        .filter(|name| name != "." && name != "..")
        .collect();
    names.sort();
    assert_eq!(names, vec!["existing.txt", "nested"]);

    sftp.rename("/nested/inner.txt", "/moved.txt")
        .await
        .expect("rename");
    sftp.remove_dir("/nested").await.expect("rmdir");
    sftp.remove_file("/moved.txt").await.expect("remove");

    assert!(!server.root().join("nested").exists());
    assert!(!server.root().join("moved.txt").exists());

    server.stop().await;
}

#[tokio::test]
async fn test_missing_file_is_reported() {
    let server = TestServer::start(password_builder()).await;
    let handle = login(server.addr()).await;
    let sftp = open_sftp(&handle).await;

    assert!(sftp.open("/does-not-exist").await.is_err());
    assert!(sftp.metadata("/does-not-exist").await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_paths_cannot_escape_root() {
    let server = TestServer::start(password_builder()).await;
    let handle = login(server.addr()).await;
    let sftp = open_sftp(&handle).await;

    upload(&sftp, "../../escaped.txt", b"jailed").await;

    assert_eq!(
        std::fs::read(server.root().join("escaped.txt")).expect("file inside root"),
        b"jailed"
    );
    let parent = server.root().parent().expect("root has a parent");
    assert!(!parent.join("escaped.txt").exists());

    server.stop().await;
}

/// Panics on the first session, serves SFTP afterwards.
struct PanicOnce {
    inner: SftpTransfer,
    sessions: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl FileTransfer for PanicOnce {
    async fn serve(&self, stream: BoxedStream) -> io::Result<()> {
        if self.sessions.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("simulated protocol crash");
        }
        self.inner.serve(stream).await
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown().await
    }
}

#[tokio::test]
async fn test_panicking_session_is_isolated() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let root = tempfile::tempdir().expect("tempdir");

    let factory_root = root.path().to_path_buf();
    let factory_sessions = Arc::clone(&sessions);
    let factory_shutdowns = Arc::clone(&shutdowns);
    let server = TestServer::start(password_builder().file_transfer(move || {
        Arc::new(PanicOnce {
            inner: SftpTransfer::new(factory_root.clone()),
            sessions: Arc::clone(&factory_sessions),
            shutdowns: Arc::clone(&factory_shutdowns),
        }) as Arc<dyn FileTransfer>
    }))
    .await;

    let handle = login(server.addr()).await;

    let mut crashed = handle.channel_open_session().await.expect("open session");
    crashed
        .request_subsystem(true, "sftp")
        .await
        .expect("request sftp");
    // The runner closes the channel after the crash.
    tokio::time::timeout(DEFAULT_TIMEOUT, async {
        while let Some(msg) = crashed.wait().await {
            if matches!(msg, russh::ChannelMsg::Close) {
                break;
            }
        }
    })
    .await
    .expect("crashed channel should close");
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

    // A sibling session on the same connection works.
    let sftp = open_sftp(&handle).await;
    upload(&sftp, "/survivor.txt", b"ok").await;
    assert_eq!(
        std::fs::read(root.path().join("survivor.txt")).expect("file on disk"),
        b"ok"
    );

    server.stop().await;
}
