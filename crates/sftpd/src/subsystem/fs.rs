//! Local filesystem backend for the SFTP engine.
//!
//! Client paths are virtual: `/` is the configured root directory and
//! `..` never climbs above it. Symlinks are resolved before use and
//! refused if their target lies outside the root.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};

// Upper bound on a single READ reply.
const MAX_READ_LEN: u32 = 256 * 1024;

enum OpenHandle {
    File(tokio::fs::File),
    Dir { entries: Option<Vec<File>> },
}

/// SFTP request handler over a local directory tree.
pub struct LocalFs {
    root: PathBuf,
    handles: HashMap<String, OpenHandle>,
    next_handle: u64,
}

impl std::fmt::Debug for LocalFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFs")
            .field("root", &self.root)
            .field("open_handles", &self.handles.len())
            .finish()
    }
}

impl LocalFs {
    /// Creates a handler serving `root` as `/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Maps a client path to a path under the root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let virtual_path = normalize(path);
        self.root.join(virtual_path.trim_start_matches('/'))
    }

    /// Resolves a client path and checks that its real location stays
    /// under the root.
    ///
    /// The parent directory is always resolved through symlinks. The
    /// final component is resolved too when `follow` is set; otherwise
    /// the operation acts on the link itself.
    async fn confine(&self, path: &str, follow: bool) -> Result<PathBuf, StatusCode> {
        let real_root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| status_of(&e))?;
        if normalize(path) == "/" {
            return Ok(real_root);
        }
        let candidate = self.resolve(path);
        let (Some(parent), Some(name)) = (candidate.parent(), candidate.file_name()) else {
            return Ok(real_root);
        };

        let real_parent = tokio::fs::canonicalize(parent)
            .await
            .map_err(|e| status_of(&e))?;
        if !real_parent.starts_with(&real_root) {
            return Err(escaped(path));
        }
        let target = real_parent.join(name);
        if !follow {
            return Ok(target);
        }

        match tokio::fs::canonicalize(&target).await {
            Ok(real) if real.starts_with(&real_root) => Ok(real),
            Ok(_) => Err(escaped(path)),
            // A dangling link could still be created through.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match tokio::fs::symlink_metadata(&target).await {
                    Ok(meta) if meta.file_type().is_symlink() => Err(escaped(path)),
                    _ => Ok(target),
                }
            }
            Err(e) => Err(status_of(&e)),
        }
    }

    fn insert(&mut self, handle: OpenHandle) -> String {
        self.next_handle += 1;
        let key = self.next_handle.to_string();
        self.handles.insert(key.clone(), handle);
        key
    }

    fn file(&mut self, handle: &str) -> Result<&mut tokio::fs::File, StatusCode> {
        match self.handles.get_mut(handle) {
            Some(OpenHandle::File(file)) => Ok(file),
            _ => Err(StatusCode::Failure),
        }
    }
}

/// Normalizes a client path to an absolute virtual path.
///
/// Relative paths are taken relative to `/`; `.` and empty components
/// are dropped and `..` at the top stays at `/`.
pub(crate) fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn escaped(path: &str) -> StatusCode {
    debug!(path, "Refusing path that resolves outside the root");
    StatusCode::PermissionDenied
}

fn status_of(err: &io::Error) -> StatusCode {
    match err.kind() {
        io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn open_options(flags: OpenFlags) -> OpenOptions {
    let mut options = OpenOptions::new();
    options
        .read(flags.contains(OpenFlags::READ))
        .write(flags.contains(OpenFlags::WRITE) || flags.contains(OpenFlags::APPEND))
        .append(flags.contains(OpenFlags::APPEND))
        .truncate(flags.contains(OpenFlags::TRUNCATE));
    if flags.contains(OpenFlags::CREATE) {
        if flags.contains(OpenFlags::EXCLUDE) {
            options.create_new(true);
        } else {
            options.create(true);
        }
    }
    options
}

async fn attrs_at(path: &Path, follow: bool) -> Result<FileAttributes, StatusCode> {
    let metadata = if follow {
        tokio::fs::metadata(path).await
    } else {
        tokio::fs::symlink_metadata(path).await
    };
    metadata
        .map(|meta| FileAttributes::from(&meta))
        .map_err(|e| status_of(&e))
}

#[async_trait]
impl russh_sftp::server::Handler for LocalFs {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        debug!(version, root = %self.root.display(), "SFTP session initialized");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let path = self.confine(&filename, true).await?;
        trace!(path = %path.display(), "open");
        let file = open_options(pflags)
            .open(&path)
            .await
            .map_err(|e| status_of(&e))?;
        let handle = self.insert(OpenHandle::File(file));
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        match self.handles.remove(&handle) {
            Some(OpenHandle::File(mut file)) => {
                file.flush().await.map_err(|e| status_of(&e))?;
                Ok(ok(id))
            }
            Some(OpenHandle::Dir { .. }) => Ok(ok(id)),
            None => Err(StatusCode::Failure),
        }
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.file(&handle)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| status_of(&e))?;

        let mut data = vec![0u8; len.min(MAX_READ_LEN) as usize];
        let n = file.read(&mut data).await.map_err(|e| status_of(&e))?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.file(&handle)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| status_of(&e))?;
        file.write_all(&data).await.map_err(|e| status_of(&e))?;
        file.flush().await.map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = attrs_at(&self.confine(&path, false).await?, false).await?;
        Ok(Attrs { id, attrs })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let file = self.file(&handle)?;
        let meta = file.metadata().await.map_err(|e| status_of(&e))?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let dir = self.confine(&path, true).await?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| status_of(&e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| status_of(&e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let attrs = match entry.metadata().await {
                Ok(meta) => FileAttributes::from(&meta),
                Err(e) => {
                    debug!(name = %name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            entries.push(File::new(name, attrs));
        }

        let handle = self.insert(OpenHandle::Dir {
            entries: Some(entries),
        });
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(OpenHandle::Dir { entries }) => match entries.take() {
                Some(files) if !files.is_empty() => Ok(Name { id, files }),
                _ => Err(StatusCode::Eof),
            },
            _ => Err(StatusCode::Failure),
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        tokio::fs::remove_file(self.confine(&filename, false).await?)
            .await
            .map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        tokio::fs::create_dir(self.confine(&path, false).await?)
            .await
            .map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        tokio::fs::remove_dir(self.confine(&path, false).await?)
            .await
            .map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        Ok(Name {
            id,
            files: vec![File::dummy(normalize(&path))],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = attrs_at(&self.confine(&path, true).await?, true).await?;
        Ok(Attrs { id, attrs })
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        let from = self.confine(&oldpath, false).await?;
        let to = self.confine(&newpath, false).await?;
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }
}
