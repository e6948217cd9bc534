//! Container-registry storage on top of the blob file system.
//!
//! Three namespaces live under the root prefix:
//!
//! - `uploads/<id>`: in-progress uploads, keyed by an opaque id
//! - `blobs/<algorithm>/<hash>`: finalized, digest-addressed blobs
//! - `manifests/<algorithm>/<hash>`: manifests
//!
//! Finalizing an upload either renames it into the blob namespace or
//! deletes it. Both are two remote calls with nothing isolating them from a
//! concurrent finalize of the same id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::file_mode::{FileAccess, FileMode};
use super::file_system::{BlobFileSystem, FileSystemStore};
use super::staged_stream::{OpenedFile, StagedStream};
use crate::errors::{FsError, FsResult};
use crate::models::digest::Digest;

pub const UPLOADS_DIR: &str = "uploads";
pub const BLOBS_DIR: &str = "blobs";
pub const MANIFESTS_DIR: &str = "manifests";

/// Size reported for a committed upload under [`UploadSizeReporting::Placeholder`].
pub const PLACEHOLDER_UPLOAD_SIZE: u64 = 1;

/// What `complete_upload` reports as the committed blob's size.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UploadSizeReporting {
    /// Always [`PLACEHOLDER_UPLOAD_SIZE`]; no extra round-trip.
    #[default]
    Placeholder,
    /// Fetch the blob's properties after the rename and report its length.
    Actual,
}

pub fn upload_path(upload_id: &str) -> String {
    format!("{UPLOADS_DIR}/{upload_id}")
}

pub fn blob_path(digest: &Digest) -> String {
    format!("{BLOBS_DIR}/{}", digest.key_segments())
}

pub fn manifest_path(digest: &Digest) -> String {
    format!("{MANIFESTS_DIR}/{}", digest.key_segments())
}

/// Registry-shaped operations, addressed by upload id or digest.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Read an upload's current content.
    async fn open_upload(&self, upload_id: &str) -> FsResult<OpenedFile>;

    /// Start a fresh upload, replacing any previous one with the same id.
    async fn create_upload(&self, upload_id: &str) -> FsResult<StagedStream>;

    /// Resuming a partial upload is not supported.
    async fn continue_upload(&self, upload_id: &str) -> FsResult<StagedStream>;

    /// Commit the upload as the blob for `digest`, or abort it when `None`.
    ///
    /// Returns 0 on abort, otherwise the size according to the configured
    /// [`UploadSizeReporting`].
    async fn complete_upload(&self, upload_id: &str, digest: Option<&Digest>) -> FsResult<u64>;

    async fn list_uploads(&self) -> FsResult<Vec<String>>;

    async fn open_blob(&self, digest: &Digest) -> FsResult<OpenedFile>;
    async fn blob_size(&self, digest: &Digest) -> FsResult<Option<u64>>;
    async fn list_blobs(&self) -> FsResult<Vec<Digest>>;
    async fn delete_blob(&self, digest: &Digest) -> FsResult<()>;

    async fn open_manifest(&self, digest: &Digest) -> FsResult<OpenedFile>;
    async fn create_manifest(&self, digest: &Digest) -> FsResult<StagedStream>;
    async fn manifest_size(&self, digest: &Digest) -> FsResult<Option<u64>>;
    /// Digests of stored manifests. Entries whose name is not a valid
    /// digest (odd-length or non-hex hash, extra segments) are skipped.
    async fn list_manifests(&self) -> FsResult<Vec<Digest>>;
    async fn delete_manifest(&self, digest: &Digest) -> FsResult<()>;
}

impl BlobFileSystem {
    /// Digests stored under `dir`; entries that do not parse are skipped.
    async fn list_digests(&self, dir: &str) -> FsResult<Vec<Digest>> {
        let keys = self.list_relative_keys(dir).await?;
        Ok(keys
            .iter()
            .filter_map(|tail| match Digest::from_key_segments(tail) {
                Ok(digest) => Some(digest),
                Err(err) => {
                    debug!("skipping {}/{}: {}", dir, tail, err);
                    None
                }
            })
            .collect())
    }

    async fn size_at(&self, path: &str) -> FsResult<Option<u64>> {
        Ok(self.properties(path).await?.map(|props| props.size))
    }
}

#[async_trait]
impl RegistryStore for BlobFileSystem {
    async fn open_upload(&self, upload_id: &str) -> FsResult<OpenedFile> {
        self.open(&upload_path(upload_id), FileMode::Open, FileAccess::Read)
            .await
    }

    async fn create_upload(&self, upload_id: &str) -> FsResult<StagedStream> {
        self.open_staged(&upload_path(upload_id), FileMode::Create, FileAccess::Write)
            .await
    }

    async fn continue_upload(&self, _upload_id: &str) -> FsResult<StagedStream> {
        Err(FsError::Unsupported("resuming an upload"))
    }

    async fn complete_upload(&self, upload_id: &str, digest: Option<&Digest>) -> FsResult<u64> {
        let upload = upload_path(upload_id);
        let Some(digest) = digest else {
            self.delete(&upload).await?;
            debug!("aborted upload {}", upload_id);
            return Ok(0);
        };

        let blob = blob_path(digest);
        self.delete(&blob).await?;
        self.rename(&upload, &blob).await?;
        debug!("committed upload {} as {}", upload_id, digest);

        match self.upload_size_reporting {
            UploadSizeReporting::Placeholder => Ok(PLACEHOLDER_UPLOAD_SIZE),
            UploadSizeReporting::Actual => self
                .size_at(&blob)
                .await?
                .ok_or_else(|| FsError::NotFound(blob.clone())),
        }
    }

    async fn list_uploads(&self) -> FsResult<Vec<String>> {
        let keys = self.list_relative_keys(UPLOADS_DIR).await?;
        Ok(keys
            .into_iter()
            .filter(|tail| !tail.is_empty() && !tail.contains('/'))
            .collect())
    }

    async fn open_blob(&self, digest: &Digest) -> FsResult<OpenedFile> {
        self.open(&blob_path(digest), FileMode::Open, FileAccess::Read)
            .await
    }

    async fn blob_size(&self, digest: &Digest) -> FsResult<Option<u64>> {
        self.size_at(&blob_path(digest)).await
    }

    async fn list_blobs(&self) -> FsResult<Vec<Digest>> {
        self.list_digests(BLOBS_DIR).await
    }

    async fn delete_blob(&self, digest: &Digest) -> FsResult<()> {
        self.delete(&blob_path(digest)).await
    }

    async fn open_manifest(&self, digest: &Digest) -> FsResult<OpenedFile> {
        self.open(&manifest_path(digest), FileMode::Open, FileAccess::Read)
            .await
    }

    async fn create_manifest(&self, digest: &Digest) -> FsResult<StagedStream> {
        self.open_staged(&manifest_path(digest), FileMode::Create, FileAccess::Write)
            .await
    }

    async fn manifest_size(&self, digest: &Digest) -> FsResult<Option<u64>> {
        self.size_at(&manifest_path(digest)).await
    }

    async fn list_manifests(&self) -> FsResult<Vec<Digest>> {
        self.list_digests(MANIFESTS_DIR).await
    }

    async fn delete_manifest(&self, digest: &Digest) -> FsResult<()> {
        self.delete(&manifest_path(digest)).await
    }
}
