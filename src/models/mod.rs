//! Data carried between the file-system layer and the object store.
//!
//! None of these are persisted by this crate: entries and listings are
//! produced per call, and a `Digest` is pure identity.

pub mod digest;
pub mod entry;
pub mod object;
