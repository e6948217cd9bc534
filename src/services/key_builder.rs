//! Mapping of virtual paths onto flat object keys.

use std::fmt;

pub const SEPARATOR: char = '/';

/// A flat object-store key: normalised root prefix plus normalised path.
///
/// Never contains two consecutive separators.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key viewed as a directory: with exactly one trailing separator,
    /// or empty for the container root.
    pub fn as_dir_prefix(&self) -> String {
        if self.0.is_empty() || self.0.ends_with(SEPARATOR) {
            self.0.clone()
        } else {
            format!("{}{}", self.0, SEPARATOR)
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Trim separators at both ends and collapse runs of separators into one.
pub fn normalize_path(path: &str) -> String {
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds object keys under a configured root prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyBuilder {
    root_prefix: String,
}

impl KeyBuilder {
    /// An empty root stays empty; anything else ends with exactly one separator.
    pub fn new(root_path: &str) -> Self {
        let normalized = normalize_path(root_path);
        let root_prefix = if normalized.is_empty() {
            normalized
        } else {
            format!("{normalized}{SEPARATOR}")
        };
        Self { root_prefix }
    }

    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    pub fn build(&self, virtual_path: &str) -> ObjectKey {
        ObjectKey(format!("{}{}", self.root_prefix, normalize_path(virtual_path)))
    }

    /// Undo `build` for a key found by listing; `None` when the key lies
    /// outside the root prefix.
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.root_prefix.as_str())
    }
}

/// Last segment of a key or prefix, ignoring a trailing separator.
pub fn last_segment(key: &str) -> &str {
    let trimmed = key.trim_end_matches(SEPARATOR);
    trimmed.rsplit(SEPARATOR).next().unwrap_or(trimmed)
}
