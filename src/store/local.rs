//! Object store on local disk.
//!
//! The object at key `k` in container `c` lives at `{base}/{c}/{k}/.blob`.
//! Giving every key its own directory lets `a` and `a/b` coexist the way
//! they do in a real object store. Payloads are written to a temporary file
//! next to the target, fsynced, and renamed into place.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ObjectReader, ObjectStore, paginate};
use crate::errors::{StoreError, StoreResult};
use crate::models::object::{CopyStatus, ListPage, ListRequest, ObjectProperties};

const BLOB_FILE: &str = ".blob";
const TMP_PREFIX: &str = ".tmp-";
const MAX_OBJECT_KEY_LEN: usize = 1024;

type CopyTable = Arc<Mutex<HashMap<(String, String), CopyStatus>>>;

#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    /// Directory holding one subdirectory per container.
    base_path: PathBuf,

    /// Status of server-side copies, keyed by `(container, target key)`.
    copies: CopyTable,
}

impl LocalDiskStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            copies: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Reject keys that cannot be mapped onto a directory tree.
    ///
    /// Besides the usual traversal vectors this refuses the segment names the
    /// layout reserves for itself (`.blob` and `.tmp-*`).
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        for segment in key.split('/') {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment == BLOB_FILE
                || segment.starts_with(TMP_PREFIX)
            {
                return Err(invalid());
            }
        }
        Ok(())
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    fn object_dir(&self, container: &str, key: &str) -> PathBuf {
        let mut path = self.container_root(container);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    fn blob_path(&self, container: &str, key: &str) -> PathBuf {
        self.object_dir(container, key).join(BLOB_FILE)
    }

    /// Current copy status of `key`.
    ///
    /// With `consume` set, a terminal status is handed out once and then
    /// dropped from the table.
    fn copy_status(&self, container: &str, key: &str, consume: bool) -> Option<CopyStatus> {
        let mut copies = self.copies.lock().expect("lock poisoned");
        let slot = (container.to_string(), key.to_string());
        let status = copies.get(&slot).cloned()?;
        if consume && !matches!(status, CopyStatus::Pending) {
            copies.remove(&slot);
        }
        Some(status)
    }

    fn forget_copy(&self, container: &str, key: &str) {
        self.copies
            .lock()
            .expect("lock poisoned")
            .remove(&(container.to_string(), key.to_string()));
    }

    async fn ensure_container(&self, container: &str) -> StoreResult<PathBuf> {
        let root = self.container_root(container);
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(StoreError::ContainerNotFound(container.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::ContainerNotFound(container.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn read_properties(
        &self,
        container: &str,
        key: &str,
        blob_path: &Path,
        consume_copy_status: bool,
    ) -> StoreResult<Option<ObjectProperties>> {
        let copy_status = self.copy_status(container, key, consume_copy_status);
        match fs::metadata(blob_path).await {
            Ok(meta) => Ok(Some(ObjectProperties {
                key: key.to_string(),
                size: meta.len(),
                etag: None,
                last_modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
                copy_status,
            })),
            // Without a blob only a copy still in flight makes the key visible.
            // A failed copy is reported as such once, then the key is gone.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(match copy_status {
                Some(CopyStatus::Pending) => Some(ObjectProperties {
                    key: key.to_string(),
                    size: 0,
                    etag: None,
                    last_modified: Utc::now(),
                    copy_status: Some(CopyStatus::Pending),
                }),
                Some(CopyStatus::Failed(reason)) if consume_copy_status => {
                    Some(ObjectProperties {
                        key: key.to_string(),
                        size: 0,
                        etag: None,
                        last_modified: Utc::now(),
                        copy_status: Some(CopyStatus::Failed(reason)),
                    })
                }
                _ => None,
            }),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Recursively remove empty directories up to the container root.
    ///
    /// Stops at the first directory that is not empty, is missing, or fails
    /// for any other reason.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Collect every object key below `start`, whose key prefix is `start_key`.
    async fn walk_keys(start: PathBuf, start_key: String) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(start, start_key)];

        while let Some((dir, key)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    let child_key = if key.is_empty() {
                        name
                    } else {
                        format!("{key}/{name}")
                    };
                    pending.push((entry.path(), child_key));
                } else if name == BLOB_FILE && !key.is_empty() {
                    keys.push(key.clone());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for LocalDiskStore {
    async fn create_container_if_missing(&self, container: &str) -> StoreResult<()> {
        fs::create_dir_all(self.container_root(container)).await?;
        Ok(())
    }

    async fn properties(
        &self,
        container: &str,
        key: &str,
    ) -> StoreResult<Option<ObjectProperties>> {
        Self::ensure_key_safe(key)?;
        let blob_path = self.blob_path(container, key);
        self.read_properties(container, key, &blob_path, true).await
    }

    async fn open_read(&self, container: &str, key: &str) -> StoreResult<ObjectReader> {
        Self::ensure_key_safe(key)?;
        let file = File::open(self.blob_path(container, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::ObjectNotFound {
                        container: container.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;
        Ok(Box::new(file))
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> StoreResult<ObjectProperties> {
        Self::ensure_key_safe(key)?;
        self.ensure_container(container).await?;

        let dir = self.object_dir(container, key);
        fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let file_path = dir.join(BLOB_FILE);

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        self.forget_copy(container, key);
        let etag = format!("{:x}", md5::compute(&data));
        debug!("wrote {} bytes to {}", data.len(), file_path.display());

        Ok(ObjectProperties {
            key: key.to_string(),
            size: data.len() as u64,
            etag: Some(etag),
            last_modified: Utc::now(),
            copy_status: None,
        })
    }

    async fn start_copy(&self, container: &str, from: &str, to: &str) -> StoreResult<()> {
        Self::ensure_key_safe(from)?;
        Self::ensure_key_safe(to)?;
        self.ensure_container(container).await?;

        let source = self.blob_path(container, from);
        if !fs::try_exists(&source).await? {
            return Err(StoreError::ObjectNotFound {
                container: container.to_string(),
                key: from.to_string(),
            });
        }

        let slot = (container.to_string(), to.to_string());
        self.copies
            .lock()
            .expect("lock poisoned")
            .insert(slot.clone(), CopyStatus::Pending);

        let target_dir = self.object_dir(container, to);
        let copies = Arc::clone(&self.copies);
        tokio::spawn(async move {
            let tmp_path = target_dir.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
            let copy = async {
                fs::create_dir_all(&target_dir).await?;
                fs::copy(&source, &tmp_path).await?;
                fs::rename(&tmp_path, target_dir.join(BLOB_FILE)).await
            };
            let status = match copy.await {
                Ok(()) => CopyStatus::Success,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    warn!("copy into {} failed: {}", target_dir.display(), err);
                    CopyStatus::Failed(err.to_string())
                }
            };
            copies.lock().expect("lock poisoned").insert(slot, status);
        });

        Ok(())
    }

    async fn delete_if_exists(&self, container: &str, key: &str) -> StoreResult<bool> {
        Self::ensure_key_safe(key)?;
        let blob_path = self.blob_path(container, key);
        let removed = match fs::remove_file(&blob_path).await {
            Ok(_) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(StoreError::Io(err)),
        };
        self.forget_copy(container, key);

        if removed {
            debug!("removed {}", blob_path.display());
            let root = self.container_root(container);
            self.prune_empty_dirs(&self.object_dir(container, key), &root)
                .await;
        }
        Ok(removed)
    }

    async fn list_page(&self, container: &str, request: &ListRequest) -> StoreResult<ListPage> {
        // Walk only the deepest directory the prefix names in full.
        let dir_key = match request.prefix.rfind('/') {
            Some(pos) => request.prefix[..pos].to_string(),
            None => String::new(),
        };
        let start = if dir_key.is_empty() {
            self.container_root(container)
        } else {
            Self::ensure_key_safe(&dir_key)?;
            self.object_dir(container, &dir_key)
        };

        let keys = Self::walk_keys(start, dir_key).await?;
        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            if !key.starts_with(&request.prefix) {
                continue;
            }
            let blob_path = self.blob_path(container, &key);
            if let Some(props) = self
                .read_properties(container, &key, &blob_path, false)
                .await?
            {
                objects.push(props);
            }
        }
        Ok(paginate(objects, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(LocalDiskStore::ensure_key_safe("a/b/c.txt").is_ok());
        assert!(LocalDiskStore::ensure_key_safe("").is_err());
        assert!(LocalDiskStore::ensure_key_safe("a//b").is_err());
        assert!(LocalDiskStore::ensure_key_safe("a/../b").is_err());
        assert!(LocalDiskStore::ensure_key_safe("a/.blob").is_err());
        assert!(LocalDiskStore::ensure_key_safe("a/.tmp-x").is_err());
        assert!(LocalDiskStore::ensure_key_safe("a\\b").is_err());
        assert!(LocalDiskStore::ensure_key_safe(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn nested_keys_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path());
        store.create_container_if_missing("c").await.unwrap();

        store.put("c", "a", Bytes::from_static(b"1")).await.unwrap();
        store.put("c", "a/b", Bytes::from_static(b"22")).await.unwrap();

        assert_eq!(store.properties("c", "a").await.unwrap().unwrap().size, 1);
        assert_eq!(store.properties("c", "a/b").await.unwrap().unwrap().size, 2);

        let page = store
            .list_page("c", &ListRequest::recursive(""))
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.clone()).collect();
        assert_eq!(keys, vec!["a".to_string(), "a/b".to_string()]);
    }

    #[tokio::test]
    async fn delete_prunes_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path());
        store.create_container_if_missing("c").await.unwrap();
        store.put("c", "x/y/z", Bytes::from_static(b"q")).await.unwrap();

        assert!(store.delete_if_exists("c", "x/y/z").await.unwrap());
        assert!(!dir.path().join("c").join("x").exists());
        assert!(dir.path().join("c").exists());
        assert!(!store.delete_if_exists("c", "x/y/z").await.unwrap());
    }

    #[tokio::test]
    async fn put_into_missing_container_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path());
        let err = store.put("nope", "k", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::ContainerNotFound(_)));
    }

    async fn settled_status(store: &LocalDiskStore, key: &str) -> Option<ObjectProperties> {
        for _ in 0..500 {
            let props = store.properties("c", key).await.unwrap();
            if !matches!(
                props.as_ref().and_then(|p| p.copy_status.as_ref()),
                Some(CopyStatus::Pending)
            ) {
                return props;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("copy to {key} never settled");
    }

    #[tokio::test]
    async fn failed_copy_leaves_no_object_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path());
        store.create_container_if_missing("c").await.unwrap();
        store.put("c", "src", Bytes::from_static(b"data")).await.unwrap();
        // A plain file where the target's parent directory should go.
        std::fs::write(dir.path().join("c").join("blocked"), b"").unwrap();

        store.start_copy("c", "src", "blocked/dst").await.unwrap();
        let props = settled_status(&store, "blocked/dst").await.unwrap();
        assert!(matches!(props.copy_status, Some(CopyStatus::Failed(_))));

        assert!(store.properties("c", "blocked/dst").await.unwrap().is_none());
        assert!(!store.exists("c", "blocked/dst").await.unwrap());
        assert!(store.open_read("c", "blocked/dst").await.is_err());
        assert!(store.copies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_copy_status_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path());
        store.create_container_if_missing("c").await.unwrap();
        store.put("c", "src", Bytes::from_static(b"data")).await.unwrap();

        store.start_copy("c", "src", "dst").await.unwrap();
        let props = settled_status(&store, "dst").await.unwrap();
        assert_eq!(props.copy_status, Some(CopyStatus::Success));
        assert_eq!(props.size, 4);

        let again = store.properties("c", "dst").await.unwrap().unwrap();
        assert_eq!(again.copy_status, None);
        assert!(store.copies.lock().unwrap().is_empty());
    }
}
