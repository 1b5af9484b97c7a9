//! File-transfer subsystem sessions.
//!
//! A subsystem session binds one SSH channel to one running instance of
//! a file-transfer protocol. [`run_session`] owns the whole lifetime: it
//! runs the protocol until the stream closes, then shuts the protocol
//! down and closes the channel, in that order, on every exit path.

mod fs;
mod sftp;

pub use fs::LocalFs;
pub use sftp::SftpTransfer;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::Result;

/// Name of the SFTP subsystem as requested by clients.
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// A bidirectional byte stream carrying one subsystem session.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// A boxed [`DuplexStream`].
pub type BoxedStream = Box<dyn DuplexStream>;

/// A file-transfer protocol bound to a single channel.
///
/// # Example
///
/// ```rust,ignore
/// use sftpd::subsystem::{BoxedStream, FileTransfer};
///
/// struct Discard;
///
/// #[async_trait::async_trait]
/// impl FileTransfer for Discard {
///     async fn serve(&self, mut stream: BoxedStream) -> std::io::Result<()> {
///         tokio::io::copy(&mut stream, &mut tokio::io::sink()).await.map(|_| ())
///     }
///
///     async fn shutdown(&self) -> std::io::Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Runs the protocol over `stream` until it closes or fails.
    ///
    /// End-of-stream is a normal closure and should return `Ok(())`.
    async fn serve(&self, stream: BoxedStream) -> io::Result<()>;

    /// Releases any resources held by the protocol.
    ///
    /// Called exactly once per session, after `serve` has returned or
    /// panicked.
    async fn shutdown(&self) -> io::Result<()>;
}

/// Creates one [`FileTransfer`] per accepted subsystem request.
pub type FileTransferFactory = Arc<dyn Fn() -> Arc<dyn FileTransfer> + Send + Sync>;

/// Closes the channel a session ran on.
#[async_trait]
pub trait ChannelCloser: Send + Sync {
    /// Closes the channel.
    async fn close(&self) -> Result<()>;
}

/// How a subsystem session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client closed the stream.
    Closed,
    /// The protocol stopped with an error.
    Failed(String),
    /// The protocol panicked.
    Panicked,
}

/// Runs one subsystem session to completion.
///
/// Errors and panics from the protocol are logged and reported in the
/// returned outcome; they never escape. Teardown always runs
/// `transfer.shutdown()` and then `closer.close()`, attempting the second
/// even if the first fails.
pub async fn run_session(
    transfer: Arc<dyn FileTransfer>,
    stream: BoxedStream,
    closer: Box<dyn ChannelCloser>,
) -> SessionOutcome {
    let serving = Arc::clone(&transfer);
    let outcome = match tokio::spawn(async move { serving.serve(stream).await }).await {
        Ok(Ok(())) => {
            info!("SFTP client has been closed");
            SessionOutcome::Closed
        }
        Ok(Err(e)) if is_end_of_stream(&e) => {
            info!("SFTP client has been closed");
            SessionOutcome::Closed
        }
        Ok(Err(e)) => {
            warn!(error = %e, "sftp server completed with error");
            SessionOutcome::Failed(e.to_string())
        }
        Err(e) if e.is_panic() => {
            error!("sftp server panicked");
            SessionOutcome::Panicked
        }
        Err(e) => {
            warn!(error = %e, "sftp server task was cancelled");
            SessionOutcome::Failed(e.to_string())
        }
    };

    if let Err(e) = transfer.shutdown().await {
        warn!(error = %e, "error closing sftp server");
    }

    match closer.close().await {
        Ok(()) => debug!("Subsystem channel closed"),
        Err(e) => warn!(error = %e, "error closing channel"),
    }

    outcome
}

/// Returns true for errors that only mean the peer went away.
pub(crate) fn is_end_of_stream(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}
