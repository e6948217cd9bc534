use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Mutex, RwLock};
use tracing::debug;

use super::{ObjectReader, ObjectStore, paginate};
use crate::errors::{StoreError, StoreResult};
use crate::models::object::{CopyStatus, ListPage, ListRequest, ObjectProperties};

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
    copy_status: Option<CopyStatus>,
    /// Status polls left before a pending copy reports success.
    pending_polls: u32,
}

impl StoredBlob {
    fn new(data: Bytes) -> Self {
        let etag = format!("{:x}", md5::compute(&data));
        Self {
            data,
            etag,
            last_modified: Utc::now(),
            copy_status: None,
            pending_polls: 0,
        }
    }

    fn properties(&self, key: &str) -> ObjectProperties {
        ObjectProperties {
            key: key.to_string(),
            size: self.data.len() as u64,
            etag: Some(self.etag.clone()),
            last_modified: self.last_modified,
            copy_status: self.copy_status.clone(),
        }
    }
}

/// Failures the in-memory store injects on request.
#[derive(Debug, Default)]
struct Faults {
    copy_pending_polls: u32,
    fail_copies: bool,
    fail_puts: bool,
    fail_delete_of: Option<String>,
}

/// In-memory object store.
///
/// Containers map to ordered key maps behind a `RwLock`. Intended for tests
/// and embedding; server-side copies complete synchronously unless a copy
/// delay is configured.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    containers: RwLock<HashMap<String, BTreeMap<String, StoredBlob>>>,
    faults: Mutex<Faults>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies stay `Pending` for the next `polls` property reads of the target.
    pub fn set_copy_pending_polls(&self, polls: u32) {
        self.faults.lock().expect("lock poisoned").copy_pending_polls = polls;
    }

    /// Every subsequent copy finishes with `CopyStatus::Failed`.
    pub fn set_fail_copies(&self, fail: bool) {
        self.faults.lock().expect("lock poisoned").fail_copies = fail;
    }

    /// Every subsequent `put` fails with a backend error.
    pub fn set_fail_puts(&self, fail: bool) {
        self.faults.lock().expect("lock poisoned").fail_puts = fail;
    }

    /// Deleting exactly this key fails with a backend error.
    pub fn set_fail_delete_of(&self, key: Option<&str>) {
        self.faults.lock().expect("lock poisoned").fail_delete_of = key.map(str::to_string);
    }

    /// Content of an object, for assertions.
    pub fn get(&self, container: &str, key: &str) -> Option<Bytes> {
        self.containers
            .read()
            .expect("lock poisoned")
            .get(container)
            .and_then(|objects| objects.get(key))
            .map(|blob| blob.data.clone())
    }

    /// All keys in a container, sorted.
    pub fn keys(&self, container: &str) -> Vec<String> {
        self.containers
            .read()
            .expect("lock poisoned")
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn container_exists(&self, container: &str) -> bool {
        self.containers
            .read()
            .expect("lock poisoned")
            .contains_key(container)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn create_container_if_missing(&self, container: &str) -> StoreResult<()> {
        self.containers
            .write()
            .expect("lock poisoned")
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn properties(
        &self,
        container: &str,
        key: &str,
    ) -> StoreResult<Option<ObjectProperties>> {
        let mut map = self.containers.write().expect("lock poisoned");
        let Some(blob) = map.get_mut(container).and_then(|objects| objects.get_mut(key)) else {
            return Ok(None);
        };

        let props = blob.properties(key);
        if blob.pending_polls > 0 {
            blob.pending_polls -= 1;
            if blob.pending_polls == 0 {
                blob.copy_status = Some(CopyStatus::Success);
            }
        }
        Ok(Some(props))
    }

    async fn open_read(&self, container: &str, key: &str) -> StoreResult<ObjectReader> {
        let data = self
            .get(container, key)
            .ok_or_else(|| StoreError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            })?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> StoreResult<ObjectProperties> {
        if self.faults.lock().expect("lock poisoned").fail_puts {
            return Err(StoreError::Backend(format!("injected put failure for `{key}`")));
        }

        let mut map = self.containers.write().expect("lock poisoned");
        let objects = map
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        let blob = StoredBlob::new(data);
        let props = blob.properties(key);
        objects.insert(key.to_string(), blob);
        debug!("stored {} bytes at {}/{}", props.size, container, key);
        Ok(props)
    }

    async fn start_copy(&self, container: &str, from: &str, to: &str) -> StoreResult<()> {
        let (pending_polls, fail_copies) = {
            let faults = self.faults.lock().expect("lock poisoned");
            (faults.copy_pending_polls, faults.fail_copies)
        };

        let mut map = self.containers.write().expect("lock poisoned");
        let objects = map
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        let source = objects
            .get(from)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                container: container.to_string(),
                key: from.to_string(),
            })?;

        let mut copied = if fail_copies {
            StoredBlob::new(Bytes::new())
        } else {
            StoredBlob::new(source.data)
        };
        copied.copy_status = Some(if fail_copies {
            CopyStatus::Failed("injected copy failure".into())
        } else if pending_polls > 0 {
            CopyStatus::Pending
        } else {
            CopyStatus::Success
        });
        if !fail_copies {
            copied.pending_polls = pending_polls;
        }
        objects.insert(to.to_string(), copied);
        Ok(())
    }

    async fn delete_if_exists(&self, container: &str, key: &str) -> StoreResult<bool> {
        if self.faults.lock().expect("lock poisoned").fail_delete_of.as_deref() == Some(key) {
            return Err(StoreError::Backend(format!("injected delete failure for `{key}`")));
        }

        let mut map = self.containers.write().expect("lock poisoned");
        Ok(map
            .get_mut(container)
            .map(|objects| objects.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list_page(&self, container: &str, request: &ListRequest) -> StoreResult<ListPage> {
        let map = self.containers.read().expect("lock poisoned");
        let Some(objects) = map.get(container) else {
            return Ok(ListPage::default());
        };
        let candidates = objects
            .range(request.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&request.prefix))
            .map(|(key, blob)| blob.properties(key));
        Ok(paginate(candidates, request))
    }
}
