//! Object properties and listing shapes exchanged with the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the most recent server-side copy into an object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum CopyStatus {
    Pending,
    Success,
    Failed(String),
}

impl CopyStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// What the object store reports about a single object.
///
/// The struct describes the object, it does not carry the payload bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectProperties {
    /// Full object key within the container.
    pub key: String,

    /// Reported length in bytes.
    pub size: u64,

    /// MD5 ETag when the backend knows it.
    pub etag: Option<String>,

    pub last_modified: DateTime<Utc>,

    /// Set when the object was (or is being) produced by a server-side copy.
    pub copy_status: Option<CopyStatus>,
}

/// One page request of a prefix listing.
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    pub prefix: String,
    /// When set, keys sharing the next segment after `prefix` collapse into
    /// a single common prefix (single-level listing).
    pub delimiter: Option<char>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

impl ListRequest {
    pub const MAX_PAGE: usize = 1000;

    /// Single-level listing under `prefix`.
    pub fn shallow(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: Some('/'),
            continuation_token: None,
            max_keys: Self::MAX_PAGE,
        }
    }

    /// Flat listing of every key under `prefix`.
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
            continuation_token: None,
            max_keys: Self::MAX_PAGE,
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }
}

/// One page of listing results.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectProperties>,
    /// Full prefixes including the trailing delimiter, e.g. `root/dir/`.
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

impl ListPage {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.common_prefixes.is_empty()
    }
}
