//! Directory entries synthesized from a flat key space.

use serde::{Deserialize, Serialize};

/// One item of a virtual directory listing.
///
/// `size` is present exactly when the entry is a file; directories are only
/// inferred from shared key prefixes and have no size of their own.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Last path segment (no separators).
    pub name: String,

    /// Reported object length, files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    pub is_directory: bool,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size: Some(size),
            is_directory: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            is_directory: true,
        }
    }
}
