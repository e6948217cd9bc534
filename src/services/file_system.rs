//! Hierarchical file-system semantics over a flat object store.
//!
//! `BlobFileSystem` maps virtual paths to object keys under a root prefix.
//! Open modes are emulated through `StagedStream`. Directories exist only as
//! shared key prefixes. Copy, rename and delete run as sequences of remote
//! calls with no rollback: a failure part-way leaves whatever already
//! happened in place.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use std::{sync::Arc, time::Duration};
use tracing::debug;

use super::file_mode::{Existence, FileAccess, FileMode, ModeDecision};
use super::key_builder::{KeyBuilder, ObjectKey, last_segment, normalize_path};
use super::registry::UploadSizeReporting;
use super::staged_stream::{OpenedFile, StagedStream, not_found_on_read};
use crate::errors::{FsError, FsResult};
use crate::models::entry::DirectoryEntry;
use crate::models::object::{CopyStatus, ListPage, ListRequest, ObjectProperties};
use crate::store::ObjectStore;

pub const DEFAULT_COPY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settings a `BlobFileSystem` is built from.
#[derive(Clone, Debug)]
pub struct FsOptions {
    pub container: String,
    pub root_path: String,
    pub copy_poll_interval: Duration,
    /// `None` polls a pending copy for as long as it takes.
    pub copy_max_polls: Option<u32>,
    pub upload_size_reporting: UploadSizeReporting,
}

impl FsOptions {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            root_path: String::new(),
            copy_poll_interval: DEFAULT_COPY_POLL_INTERVAL,
            copy_max_polls: None,
            upload_size_reporting: UploadSizeReporting::default(),
        }
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_copy_polling(mut self, interval: Duration, max_polls: Option<u32>) -> Self {
        self.copy_poll_interval = interval;
        self.copy_max_polls = max_polls;
        self
    }

    pub fn with_upload_size_reporting(mut self, reporting: UploadSizeReporting) -> Self {
        self.upload_size_reporting = reporting;
        self
    }
}

/// File-system shaped operations, addressed by virtual path.
#[async_trait]
pub trait FileSystemStore: Send + Sync {
    /// Open `path`. Plain reads (`Open` + `Read`) stream straight from the
    /// store; every other combination is staged locally until close.
    async fn open(&self, path: &str, mode: FileMode, access: FileAccess) -> FsResult<OpenedFile>;

    async fn exists(&self, path: &str) -> FsResult<bool>;

    /// Server-side copy, waiting for completion.
    async fn copy(&self, from: &str, to: &str, overwrite: bool) -> FsResult<()>;

    /// Copy then delete. A no-op when both paths name the same key,
    /// ignoring case.
    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    /// Remove a file; absent files are not an error.
    async fn delete(&self, path: &str) -> FsResult<()>;

    /// Directories are implied by keys, so there is nothing to create.
    async fn create_directory(&self, path: &str) -> FsResult<()>;

    /// Remove every object below `path` when `recursive`, otherwise nothing.
    async fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()>;

    /// Immediate children of `path`, in store order.
    async fn list_contents(&self, path: &str) -> FsResult<Vec<DirectoryEntry>>;

    /// A file entry, a directory entry, or `None` when nothing lives at `path`.
    async fn get_info(&self, path: &str) -> FsResult<Option<DirectoryEntry>>;
}

/// The object-store backed file system.
///
/// One value serves both the file-system surface ([`FileSystemStore`]) and
/// the registry surface ([`super::registry::RegistryStore`]).
#[derive(Clone, Debug)]
pub struct BlobFileSystem {
    store: Arc<dyn ObjectStore>,
    container: String,
    keys: KeyBuilder,
    copy_poll_interval: Duration,
    copy_max_polls: Option<u32>,
    pub(crate) upload_size_reporting: UploadSizeReporting,
}

impl BlobFileSystem {
    pub fn new(store: Arc<dyn ObjectStore>, options: FsOptions) -> Self {
        Self {
            store,
            keys: KeyBuilder::new(&options.root_path),
            container: options.container,
            copy_poll_interval: options.copy_poll_interval,
            copy_max_polls: options.copy_max_polls,
            upload_size_reporting: options.upload_size_reporting,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Key of a file; an empty path names no file.
    fn file_key(&self, path: &str) -> FsResult<ObjectKey> {
        if normalize_path(path).is_empty() {
            return Err(FsError::invalid(format!("`{path}` does not name a file")));
        }
        Ok(self.keys.build(path))
    }

    /// Listing prefix of a directory, with its trailing separator.
    fn dir_prefix(&self, path: &str) -> String {
        self.keys.build(path).as_dir_prefix()
    }

    /// Open through the staging buffer, for any mode and access.
    pub async fn open_staged(
        &self,
        path: &str,
        mode: FileMode,
        access: FileAccess,
    ) -> FsResult<StagedStream> {
        let decision = ModeDecision::resolve(mode, access)?;
        let key = self.file_key(path)?;
        debug!("staged open of {} as {} ({:?})", key, mode, access);
        StagedStream::open(
            Arc::clone(&self.store),
            &self.container,
            key,
            decision,
            access,
        )
        .await
    }

    /// Read-only, random-access open of an existing file, preloaded into
    /// the staging buffer so that it can be seeked.
    pub async fn open_seekable(&self, path: &str) -> FsResult<StagedStream> {
        let decision = ModeDecision {
            must_exist: Existence::Required,
            forbid_exist: false,
            preload: true,
            seek_to_end: false,
        };
        let key = self.file_key(path)?;
        StagedStream::open(
            Arc::clone(&self.store),
            &self.container,
            key,
            decision,
            FileAccess::Read,
        )
        .await
    }

    /// Properties of the object at `path`, if any.
    pub async fn properties(&self, path: &str) -> FsResult<Option<ObjectProperties>> {
        let key = self.file_key(path)?;
        Ok(self.store.properties(&self.container, key.as_str()).await?)
    }

    /// Drain every page of a listing.
    async fn list_all(&self, mut request: ListRequest) -> FsResult<ListPage> {
        let mut all = ListPage::default();
        loop {
            let page = self.store.list_page(&self.container, &request).await?;
            all.objects.extend(page.objects);
            all.common_prefixes.extend(page.common_prefixes);
            match page.next_continuation_token {
                Some(token) => request.continuation_token = Some(token),
                None => return Ok(all),
            }
        }
    }

    /// Every key below `dir`, relative to it, recursively.
    pub(crate) async fn list_relative_keys(&self, dir: &str) -> FsResult<Vec<String>> {
        let prefix = self.dir_prefix(dir);
        let listing = self.list_all(ListRequest::recursive(prefix.as_str())).await?;
        Ok(listing
            .objects
            .into_iter()
            .filter_map(|object| {
                object
                    .key
                    .strip_prefix(prefix.as_str())
                    .map(str::to_string)
            })
            .collect())
    }

    /// Start a server-side copy and poll it until it is no longer pending.
    async fn copy_key(&self, from: &ObjectKey, to: &ObjectKey) -> FsResult<()> {
        self.store
            .start_copy(&self.container, from.as_str(), to.as_str())
            .await
            .map_err(not_found_on_read)?;
        debug!("copy issued from {} to {}", from, to);

        let mut polls = 0u32;
        loop {
            let status = self
                .store
                .properties(&self.container, to.as_str())
                .await?
                .map(|props| props.copy_status);

            match status {
                None => {
                    return Err(FsError::CopyFailed {
                        from: from.to_string(),
                        to: to.to_string(),
                        reason: "target disappeared while copying".into(),
                    });
                }
                Some(None) | Some(Some(CopyStatus::Success)) => return Ok(()),
                Some(Some(CopyStatus::Failed(reason))) => {
                    return Err(FsError::CopyFailed {
                        from: from.to_string(),
                        to: to.to_string(),
                        reason,
                    });
                }
                Some(Some(CopyStatus::Pending)) => {
                    polls += 1;
                    if self.copy_max_polls.is_some_and(|max| polls >= max) {
                        return Err(FsError::CopyTimedOut {
                            to: to.to_string(),
                            polls,
                        });
                    }
                    debug!("copy to {} pending after {} polls", to, polls);
                    tokio::time::sleep(self.copy_poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl FileSystemStore for BlobFileSystem {
    async fn open(&self, path: &str, mode: FileMode, access: FileAccess) -> FsResult<OpenedFile> {
        if mode == FileMode::Open && access == FileAccess::Read {
            let key = self.file_key(path)?;
            debug!("direct read of {}", key);
            let reader = self
                .store
                .open_read(&self.container, key.as_str())
                .await
                .map_err(not_found_on_read)?;
            return Ok(OpenedFile::Direct(reader));
        }

        Ok(OpenedFile::Staged(
            self.open_staged(path, mode, access).await?,
        ))
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        let key = self.file_key(path)?;
        Ok(self.store.exists(&self.container, key.as_str()).await?)
    }

    async fn copy(&self, from: &str, to: &str, overwrite: bool) -> FsResult<()> {
        let from_key = self.file_key(from)?;
        let to_key = self.file_key(to)?;
        if !overwrite && self.store.exists(&self.container, to_key.as_str()).await? {
            return Err(FsError::AlreadyExists(to_key.into_string()));
        }
        self.copy_key(&from_key, &to_key).await
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from_key = self.file_key(from)?;
        let to_key = self.file_key(to)?;
        if from_key.as_str().to_lowercase() == to_key.as_str().to_lowercase() {
            return Ok(());
        }

        self.copy_key(&from_key, &to_key).await?;
        self.store
            .delete_if_exists(&self.container, from_key.as_str())
            .await?;
        debug!("renamed {} to {}", from_key, to_key);
        Ok(())
    }

    async fn delete(&self, path: &str) -> FsResult<()> {
        let key = self.file_key(path)?;
        let removed = self
            .store
            .delete_if_exists(&self.container, key.as_str())
            .await?;
        debug!("delete {} (existed: {})", key, removed);
        Ok(())
    }

    async fn create_directory(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        if !recursive {
            debug!("non-recursive delete of directory {} ignored", path);
            return Ok(());
        }

        let prefix = self.dir_prefix(path);
        let listing = self.list_all(ListRequest::recursive(prefix.as_str())).await?;
        debug!(
            "deleting {} objects under {}",
            listing.objects.len(),
            prefix
        );

        // Sequential; the first failure stops the walk and earlier deletes stay.
        stream::iter(listing.objects)
            .map(Ok::<_, FsError>)
            .try_for_each(|object| async move {
                self.store
                    .delete_if_exists(&self.container, &object.key)
                    .await?;
                Ok::<(), FsError>(())
            })
            .await
    }

    async fn list_contents(&self, path: &str) -> FsResult<Vec<DirectoryEntry>> {
        let prefix = self.dir_prefix(path);
        debug!("listing {}", prefix);
        let listing = self.list_all(ListRequest::shallow(prefix.as_str())).await?;

        let directories = listing
            .common_prefixes
            .iter()
            .map(|common| DirectoryEntry::directory(last_segment(common)));
        let files = listing
            .objects
            .iter()
            .filter(|object| object.key.len() > prefix.len())
            .map(|object| DirectoryEntry::file(last_segment(&object.key), object.size));
        Ok(directories.chain(files).collect())
    }

    async fn get_info(&self, path: &str) -> FsResult<Option<DirectoryEntry>> {
        let normalized = normalize_path(path);
        if !normalized.is_empty() {
            let key = self.keys.build(&normalized);
            if let Some(props) = self.store.properties(&self.container, key.as_str()).await? {
                return Ok(Some(DirectoryEntry::file(
                    last_segment(&normalized),
                    props.size,
                )));
            }
        }

        let probe = ListRequest::shallow(self.dir_prefix(&normalized)).with_max_keys(1);
        let page = self.store.list_page(&self.container, &probe).await?;
        if page.is_empty() {
            return Ok(None);
        }
        Ok(Some(DirectoryEntry::directory(last_segment(&normalized))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::store::InMemoryObjectStore;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const CONTAINER: &str = "packages";

    fn fs_over(store: &Arc<InMemoryObjectStore>, root: &str) -> BlobFileSystem {
        let options = FsOptions::new(CONTAINER)
            .with_root_path(root)
            .with_copy_polling(Duration::from_millis(1), None);
        BlobFileSystem::new(store.clone(), options)
    }

    async fn seeded(root: &str, objects: &[(&str, &[u8])]) -> (Arc<InMemoryObjectStore>, BlobFileSystem) {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_container_if_missing(CONTAINER).await.unwrap();
        for (key, content) in objects {
            store
                .put(CONTAINER, key, Bytes::copy_from_slice(content))
                .await
                .unwrap();
        }
        let fs = fs_over(&store, root);
        (store, fs)
    }

    async fn write(fs: &BlobFileSystem, path: &str, mode: FileMode, content: &[u8]) -> FsResult<()> {
        let mut file = fs.open(path, mode, FileAccess::Write).await?;
        file.write_all(content).await?;
        file.close().await
    }

    async fn read(fs: &BlobFileSystem, path: &str) -> FsResult<Vec<u8>> {
        let mut file = fs.open(path, FileMode::Open, FileAccess::Read).await?;
        let mut out = Vec::new();
        file.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn create_new_refuses_existing_and_writes_absent() {
        let (store, fs) = seeded("root", &[("root/taken", b"x")]).await;

        let err = fs
            .open("taken", FileMode::CreateNew, FileAccess::Write)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        write(&fs, "fresh", FileMode::CreateNew, b"payload").await.unwrap();
        assert_eq!(
            store.get(CONTAINER, "root/fresh").unwrap(),
            Bytes::from_static(b"payload")
        );
    }

    #[tokio::test]
    async fn open_missing_is_not_found_on_both_paths() {
        let (_store, fs) = seeded("", &[]).await;

        let staged = fs.open("nope", FileMode::Open, FileAccess::ReadWrite).await;
        assert!(staged.unwrap_err().is_not_found());

        let direct = fs.open("nope", FileMode::Open, FileAccess::Read).await;
        assert!(direct.unwrap_err().is_not_found());

        let truncate = fs.open("nope", FileMode::Truncate, FileAccess::Write).await;
        assert!(truncate.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn plain_read_is_not_staged() {
        let (_store, fs) = seeded("", &[("a.txt", b"abc")]).await;
        let file = fs.open("a.txt", FileMode::Open, FileAccess::Read).await.unwrap();
        assert!(!file.is_staged());
        let file = fs
            .open("a.txt", FileMode::OpenOrCreate, FileAccess::Read)
            .await
            .unwrap();
        assert!(file.is_staged());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_store, fs) = seeded("r", &[]).await;
        for content in [&b""[..], b"x", b"some longer content\n"] {
            write(&fs, "dir/file.bin", FileMode::Create, content).await.unwrap();
            assert_eq!(read(&fs, "dir/file.bin").await.unwrap(), content);
        }
    }

    #[tokio::test]
    async fn append_extends_existing_content() {
        let (_store, fs) = seeded("", &[("log", b"AB")]).await;
        let mut file = fs.open("log", FileMode::Append, FileAccess::Write).await.unwrap();
        assert_eq!(file.as_staged_mut().unwrap().position(), 2);
        file.write_all(b"C").await.unwrap();
        file.close().await.unwrap();
        assert_eq!(read(&fs, "log").await.unwrap(), b"ABC");
    }

    #[tokio::test]
    async fn seekable_open_preloads() {
        use tokio::io::AsyncSeekExt;
        let (_store, fs) = seeded("", &[("f", b"0123456789")]).await;
        let mut stream = fs.open_seekable("f").await.unwrap();
        stream.seek(std::io::SeekFrom::Start(7)).await.unwrap();
        let mut tail = String::new();
        stream.read_to_string(&mut tail).await.unwrap();
        assert_eq!(tail, "789");
        assert!(fs.open_seekable("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn empty_path_is_invalid() {
        let (_store, fs) = seeded("root", &[]).await;
        let err = fs.open("//", FileMode::Create, FileAccess::Write).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        assert!(matches!(fs.delete("").await, Err(FsError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn copy_respects_overwrite_flag() {
        let (store, fs) = seeded("", &[("a", b"one"), ("b", b"two")]).await;

        let err = fs.copy("a", "b", false).await.unwrap_err();
        assert!(err.is_already_exists());

        fs.copy("a", "b", true).await.unwrap();
        assert_eq!(store.get(CONTAINER, "b").unwrap(), Bytes::from_static(b"one"));

        fs.copy("a", "c", false).await.unwrap();
        assert_eq!(store.get(CONTAINER, "c").unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn copy_of_missing_source_is_not_found() {
        let (_store, fs) = seeded("", &[]).await;
        assert!(fs.copy("ghost", "t", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn copy_polls_until_done() {
        let (store, fs) = seeded("", &[("a", b"data")]).await;
        store.set_copy_pending_polls(3);
        fs.copy("a", "b", false).await.unwrap();
        assert_eq!(store.get(CONTAINER, "b").unwrap(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn copy_gives_up_after_max_polls() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_container_if_missing(CONTAINER).await.unwrap();
        store.put(CONTAINER, "a", Bytes::from_static(b"d")).await.unwrap();
        store.set_copy_pending_polls(10);
        let fs = BlobFileSystem::new(
            store.clone(),
            FsOptions::new(CONTAINER).with_copy_polling(Duration::from_millis(1), Some(3)),
        );

        let err = fs.copy("a", "b", false).await.unwrap_err();
        assert!(matches!(err, FsError::CopyTimedOut { polls: 3, .. }));
    }

    #[tokio::test]
    async fn failed_copy_propagates() {
        let (store, fs) = seeded("", &[("a", b"d")]).await;
        store.set_fail_copies(true);
        let err = fs.copy("a", "b", false).await.unwrap_err();
        assert!(matches!(err, FsError::CopyFailed { .. }));
    }

    #[tokio::test]
    async fn rename_moves_content() {
        let (store, fs) = seeded("r", &[("r/s", b"content")]).await;
        fs.rename("s", "t").await.unwrap();
        assert_eq!(store.get(CONTAINER, "r/t").unwrap(), Bytes::from_static(b"content"));
        assert!(store.get(CONTAINER, "r/s").is_none());
    }

    #[tokio::test]
    async fn rename_to_same_name_is_noop() {
        let (store, fs) = seeded("", &[("Same", b"c")]).await;
        store.set_fail_copies(true);
        fs.rename("Same", "Same").await.unwrap();
        fs.rename("Same", "sAME").await.unwrap();
        assert_eq!(store.get(CONTAINER, "Same").unwrap(), Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn rename_overwrites_target_and_keeps_source_on_failed_copy() {
        let (store, fs) = seeded("", &[("s", b"new"), ("t", b"old")]).await;
        fs.rename("s", "t").await.unwrap();
        assert_eq!(store.get(CONTAINER, "t").unwrap(), Bytes::from_static(b"new"));

        store.put(CONTAINER, "s", Bytes::from_static(b"again")).await.unwrap();
        store.set_fail_copies(true);
        assert!(fs.rename("s", "u").await.is_err());
        assert!(store.get(CONTAINER, "s").is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, fs) = seeded("", &[("x", b"1")]).await;
        fs.delete("x").await.unwrap();
        fs.delete("x").await.unwrap();
        assert!(store.get(CONTAINER, "x").is_none());
    }

    #[tokio::test]
    async fn list_contents_synthesizes_directories() {
        let (_store, fs) = seeded(
            "root",
            &[
                ("root/pkg/a.nupkg", b"12"),
                ("root/pkg/sub/b.nupkg", b"123"),
                ("root/pkg/sub/deeper/c", b"1"),
                ("root/pkg/other/d", b"1"),
                ("root/elsewhere", b"1"),
            ],
        )
        .await;

        let mut entries = fs.list_contents("pkg").await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirectoryEntry::file("a.nupkg", 2),
                DirectoryEntry::directory("other"),
                DirectoryEntry::directory("sub"),
            ]
        );

        let mut top = fs.list_contents("").await.unwrap();
        top.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            top,
            vec![
                DirectoryEntry::file("elsewhere", 1),
                DirectoryEntry::directory("pkg"),
            ]
        );
    }

    #[tokio::test]
    async fn get_info_resolves_files_then_directories() {
        let (_store, fs) = seeded("", &[("d/f.txt", b"abcd")]).await;

        assert_eq!(
            fs.get_info("d/f.txt").await.unwrap(),
            Some(DirectoryEntry::file("f.txt", 4))
        );
        assert_eq!(
            fs.get_info("/d/").await.unwrap(),
            Some(DirectoryEntry::directory("d"))
        );
        assert_eq!(fs.get_info("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_recursive_directory_delete_never_deletes() {
        let (store, fs) = seeded("", &[("d/a", b"1"), ("d/e/b", b"2")]).await;
        fs.delete_directory("d", false).await.unwrap();
        assert_eq!(store.keys(CONTAINER).len(), 2);

        fs.create_directory("whatever").await.unwrap();
        assert_eq!(store.keys(CONTAINER).len(), 2);
    }

    #[tokio::test]
    async fn recursive_directory_delete_removes_subtree_only() {
        let (store, fs) = seeded("", &[("d/a", b"1"), ("d/e/b", b"2"), ("dx", b"3")]).await;
        fs.delete_directory("d", true).await.unwrap();
        assert_eq!(store.keys(CONTAINER), vec!["dx".to_string()]);
    }

    #[tokio::test]
    async fn recursive_directory_delete_is_not_transactional() {
        let (store, fs) = seeded("", &[("d/1", b"1"), ("d/2", b"2"), ("d/3", b"3")]).await;
        store.set_fail_delete_of(Some("d/2"));

        let err = fs.delete_directory("d", true).await.unwrap_err();
        assert!(matches!(err, FsError::Store(StoreError::Backend(_))));
        assert_eq!(store.keys(CONTAINER), vec!["d/2".to_string(), "d/3".to_string()]);
    }
}
