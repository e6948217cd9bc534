//! Locally staged file handles.
//!
//! An object store only offers whole-object reads and writes. A
//! `StagedStream` gives callers a seekable read/write handle anyway: the
//! object is (optionally) downloaded into a local buffer on open, all I/O
//! happens against that buffer, and `close` uploads the entire buffer as
//! one object write. Every writable open/close pair therefore replaces the
//! target object in full or not at all.

use bytes::Bytes;
use std::{
    io::{self, Cursor, SeekFrom},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use super::file_mode::{FileAccess, ModeDecision};
use super::key_builder::ObjectKey;
use crate::errors::{FsError, FsResult, StoreError};
use crate::store::{ObjectReader, ObjectStore};

/// Initial capacity of a buffer that was not preloaded.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

pub struct StagedStream {
    buffer: Cursor<Vec<u8>>,
    can_write: bool,
    container: String,
    key: ObjectKey,
    store: Arc<dyn ObjectStore>,
    closed: bool,
}

impl StagedStream {
    /// Open `key` according to an already resolved mode decision.
    pub(crate) async fn open(
        store: Arc<dyn ObjectStore>,
        container: &str,
        key: ObjectKey,
        decision: ModeDecision,
        access: FileAccess,
    ) -> FsResult<Self> {
        // One existence check, shared by every branch below.
        let properties = store.properties(container, key.as_str()).await?;

        if decision.requires_existing() && properties.is_none() {
            return Err(FsError::NotFound(key.into_string()));
        }
        if decision.forbid_exist && properties.is_some() {
            return Err(FsError::AlreadyExists(key.into_string()));
        }

        let data = match properties {
            Some(props) if decision.preload => {
                let mut data = Vec::with_capacity(props.size as usize);
                let mut reader = store.open_read(container, key.as_str()).await?;
                reader.read_to_end(&mut data).await?;
                debug!("preloaded {} bytes from {}", data.len(), key);
                data
            }
            _ => Vec::with_capacity(DEFAULT_BUFFER_CAPACITY),
        };

        let mut buffer = Cursor::new(data);
        if decision.seek_to_end {
            buffer.set_position(buffer.get_ref().len() as u64);
        }

        Ok(Self {
            buffer,
            can_write: access.can_write(),
            container: container.to_string(),
            key,
            store,
            closed: false,
        })
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn can_write(&self) -> bool {
        self.can_write
    }

    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    /// Current logical length of the staged content.
    pub fn len(&self) -> u64 {
        self.buffer.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.get_ref().is_empty()
    }

    /// Drop everything past `len` (or zero-extend up to it).
    pub fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.ensure_writable()?;
        self.buffer.get_mut().resize(len as usize, 0);
        if self.buffer.position() > len {
            self.buffer.set_position(len);
        }
        Ok(())
    }

    /// Release the buffer and, for writable handles, upload its whole
    /// content (from offset 0, whatever the current position) to the
    /// target key. Upload failures are returned, never swallowed.
    pub async fn close(mut self) -> FsResult<()> {
        self.closed = true;
        let data = std::mem::take(self.buffer.get_mut());
        if !self.can_write {
            return Ok(());
        }

        self.store
            .create_container_if_missing(&self.container)
            .await?;
        let props = self
            .store
            .put(&self.container, self.key.as_str(), Bytes::from(data))
            .await?;
        debug!("uploaded {} bytes to {} on close", props.size, self.key);
        Ok(())
    }

    fn ensure_writable(&self) -> io::Result<()> {
        if self.can_write {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("`{}` was opened read-only", self.key),
            ))
        }
    }
}

impl std::fmt::Debug for StagedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedStream")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("position", &self.position())
            .field("can_write", &self.can_write)
            .finish()
    }
}

impl Drop for StagedStream {
    fn drop(&mut self) {
        if self.can_write && !self.closed {
            warn!(
                "writable stream for {} dropped without close; {} staged bytes discarded",
                self.key,
                self.len()
            );
        }
    }
}

impl AsyncRead for StagedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().buffer).poll_read(cx, buf)
    }
}

impl AsyncWrite for StagedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(err) = this.ensure_writable() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.buffer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Shutdown only ends local writes; the upload happens in `close`.
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for StagedStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().buffer).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().buffer).poll_complete(cx)
    }
}

/// A handle returned by `open`.
///
/// Plain reads get a direct object reader; everything else is staged.
pub enum OpenedFile {
    Direct(ObjectReader),
    Staged(StagedStream),
}

impl OpenedFile {
    pub fn is_staged(&self) -> bool {
        matches!(self, Self::Staged(_))
    }

    pub fn as_staged_mut(&mut self) -> Option<&mut StagedStream> {
        match self {
            Self::Staged(stream) => Some(stream),
            Self::Direct(_) => None,
        }
    }

    pub fn into_staged(self) -> Option<StagedStream> {
        match self {
            Self::Staged(stream) => Some(stream),
            Self::Direct(_) => None,
        }
    }

    /// Close the handle; staged writable handles upload here.
    pub async fn close(self) -> FsResult<()> {
        match self {
            Self::Direct(_) => Ok(()),
            Self::Staged(stream) => stream.close().await,
        }
    }
}

impl std::fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("OpenedFile::Direct"),
            Self::Staged(stream) => f.debug_tuple("OpenedFile::Staged").field(stream).finish(),
        }
    }
}

impl AsyncRead for OpenedFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Direct(reader) => Pin::new(reader).poll_read(cx, buf),
            Self::Staged(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for OpenedFile {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Direct(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "direct read handles are not writable",
            ))),
            Self::Staged(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Direct(_) => Poll::Ready(Ok(())),
            Self::Staged(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Direct(_) => Poll::Ready(Ok(())),
            Self::Staged(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl AsyncSeek for OpenedFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        match self.get_mut() {
            Self::Direct(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "direct read handles are not seekable; use open_seekable",
            )),
            Self::Staged(stream) => Pin::new(stream).start_seek(position),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match self.get_mut() {
            Self::Direct(_) => Poll::Ready(Ok(0)),
            Self::Staged(stream) => Pin::new(stream).poll_complete(cx),
        }
    }
}

/// Map a missing object on the direct read path to `NotFound`.
pub(crate) fn not_found_on_read(err: StoreError) -> FsError {
    match err {
        StoreError::ObjectNotFound { key, .. } => FsError::NotFound(key),
        StoreError::ContainerNotFound(container) => FsError::NotFound(container),
        other => FsError::Store(other),
    }
}
