//! SFTP protocol instance bound to a channel stream.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{oneshot, watch};
use tracing::debug;

use super::fs::LocalFs;
use super::{BoxedStream, FileTransfer, FileTransferFactory, is_end_of_stream};

// Buffer between the channel and the protocol engine.
const PIPE_CAPACITY: usize = 64 * 1024;

// How long shutdown waits for the engine to drop its end of the pipe.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves SFTP over one channel, with file access jailed to a root
/// directory.
///
/// The protocol engine runs on its own task and talks to the channel
/// through an in-memory pipe. [`serve`](FileTransfer::serve) copies bytes
/// between the two until either side closes; [`shutdown`](FileTransfer::shutdown)
/// tears the pipe down and waits for the engine to let go of it.
pub struct SftpTransfer {
    root: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    released: Mutex<Option<oneshot::Receiver<()>>>,
}

impl std::fmt::Debug for SftpTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpTransfer")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl SftpTransfer {
    /// Creates a transfer serving files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            root: root.into(),
            shutdown_tx,
            released: Mutex::new(None),
        }
    }

    /// Returns a factory producing one transfer per session.
    pub fn factory(root: impl Into<PathBuf>) -> FileTransferFactory {
        let root = root.into();
        Arc::new(move || Arc::new(Self::new(root.clone())) as Arc<dyn FileTransfer>)
    }

    /// Returns the directory served as `/`.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl FileTransfer for SftpTransfer {
    async fn serve(&self, mut stream: BoxedStream) -> io::Result<()> {
        let (mut local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (released_tx, released_rx) = oneshot::channel();
        *self.released.lock() = Some(released_rx);

        let engine_end = ReleaseOnDrop {
            inner: remote,
            _released: released_tx,
        };
        tokio::spawn(russh_sftp::server::run(engine_end, LocalFs::new(self.root.clone())));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let result = tokio::select! {
            copied = tokio::io::copy_bidirectional(&mut stream, &mut local) => {
                copied.map(|(inbound, outbound)| {
                    debug!(inbound, outbound, "sftp stream finished");
                })
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => Ok(()),
        };

        match result {
            Err(e) if is_end_of_stream(&e) => Ok(()),
            other => other,
        }
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.shutdown_tx.send_replace(true);

        let released = self.released.lock().take();
        if let Some(released) = released {
            // The sender is dropped, never sent on; either result means released.
            tokio::time::timeout(RELEASE_TIMEOUT, released)
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        "sftp engine did not release its stream",
                    )
                })?
                .ok();
        }
        Ok(())
    }
}

/// Engine end of the pipe; signals when the engine drops it.
struct ReleaseOnDrop {
    inner: DuplexStream,
    _released: oneshot::Sender<()>,
}

impl AsyncRead for ReleaseOnDrop {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ReleaseOnDrop {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
