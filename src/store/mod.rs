//! The object store collaborator: a flat `(container, key)` blob space.
//!
//! Everything above this trait (paths, directories, open modes, registry
//! layout) is emulated by the file-system layer; backends only provide the
//! primitive remote operations.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::{collections::BTreeSet, fmt};
use tokio::io::AsyncRead;

use crate::{
    errors::StoreResult,
    models::object::{ListPage, ListRequest, ObjectProperties},
};

pub mod local;
pub mod memory;

pub use local::LocalDiskStore;
pub use memory::InMemoryObjectStore;

/// A direct, unstaged read handle on an object's content.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Create the container unless it already exists.
    async fn create_container_if_missing(&self, container: &str) -> StoreResult<()>;

    /// Properties of one object, `None` when it (or its container) is absent.
    async fn properties(&self, container: &str, key: &str)
    -> StoreResult<Option<ObjectProperties>>;

    async fn exists(&self, container: &str, key: &str) -> StoreResult<bool> {
        Ok(self.properties(container, key).await?.is_some())
    }

    /// Open the object for sequential reading.
    ///
    /// Fails with `StoreError::ObjectNotFound` when absent.
    async fn open_read(&self, container: &str, key: &str) -> StoreResult<ObjectReader>;

    /// Replace the whole object with `data`.
    async fn put(&self, container: &str, key: &str, data: Bytes) -> StoreResult<ObjectProperties>;

    /// Ask the store to copy `from` onto `to` server-side.
    ///
    /// Completion is observed through `properties(container, to)`, whose
    /// `copy_status` leaves `Pending` once the copy is done.
    async fn start_copy(&self, container: &str, from: &str, to: &str) -> StoreResult<()>;

    /// Remove the object; `Ok(false)` when there was nothing to remove.
    async fn delete_if_exists(&self, container: &str, key: &str) -> StoreResult<bool>;

    /// One page of a prefix listing.
    async fn list_page(&self, container: &str, request: &ListRequest) -> StoreResult<ListPage>;
}

enum Listed {
    Object(ObjectProperties),
    Prefix(String),
}

/// Cut one listing page out of `objects`, which must be sorted by key.
///
/// Shared by the in-tree backends so they agree on delimiter grouping and
/// continuation tokens. The token is the base64 of the last key or common
/// prefix emitted; the next page resumes strictly after it.
pub(crate) fn paginate<I>(objects: I, request: &ListRequest) -> ListPage
where
    I: IntoIterator<Item = ObjectProperties>,
{
    let max_keys = request.max_keys.clamp(1, ListRequest::MAX_PAGE);
    let resume_after = request
        .continuation_token
        .as_deref()
        .map(decode_continuation_token);

    let mut page = ListPage::default();
    let mut seen_prefixes = BTreeSet::new();
    let mut emitted = 0usize;
    let mut last_marker = None;

    for object in objects {
        if !object.key.starts_with(&request.prefix) {
            continue;
        }

        let listed = match request
            .delimiter
            .and_then(|delim| compute_common_prefix(&object.key, &request.prefix, delim))
        {
            Some(prefix) => Listed::Prefix(prefix),
            None => Listed::Object(object),
        };
        let marker = match &listed {
            Listed::Object(object) => object.key.clone(),
            Listed::Prefix(prefix) => prefix.clone(),
        };

        if let Some(after) = resume_after.as_deref() {
            if marker.as_str() <= after {
                continue;
            }
        }
        if matches!(listed, Listed::Prefix(_)) && seen_prefixes.contains(&marker) {
            continue;
        }

        if emitted == max_keys {
            page.next_continuation_token = last_marker.as_deref().map(encode_continuation_token);
            break;
        }

        match listed {
            Listed::Object(object) => page.objects.push(object),
            Listed::Prefix(prefix) => {
                seen_prefixes.insert(prefix.clone());
                page.common_prefixes.push(prefix);
            }
        }
        emitted += 1;
        last_marker = Some(marker);
    }

    page
}

/// Compute the common prefix `key` rolls up into under `prefix`, if any.
///
/// Returns `Some("prefix/segment/")` when the remainder of the key after
/// `prefix` still contains the delimiter, `None` for a direct leaf.
fn compute_common_prefix(key: &str, prefix: &str, delimiter: char) -> Option<String> {
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::with_capacity(prefix.len() + pos + 1);
    combined.push_str(prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len_utf8()]);
    Some(combined)
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
