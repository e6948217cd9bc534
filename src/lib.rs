//! File-system and container-registry storage on a flat object store.
//!
//! [`BlobFileSystem`] turns a blob container into two things at once:
//!
//! - a hierarchical file system ([`FileSystemStore`]) with classic open
//!   modes, emulated by staging content locally and writing it back whole
//!   on close, and directories inferred from key prefixes;
//! - a registry backing store ([`RegistryStore`]) with uploads, blobs and
//!   manifests addressed by upload id or [`Digest`].
//!
//! The object store itself is the [`ObjectStore`] trait. Two backends ship
//! with the crate: [`InMemoryObjectStore`] and [`LocalDiskStore`].

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod store;

pub use config::AdapterConfig;
pub use errors::{FsError, FsResult, StoreError, StoreResult};
pub use models::{digest::Digest, entry::DirectoryEntry};
pub use services::{
    file_mode::{FileAccess, FileMode},
    file_system::{BlobFileSystem, FileSystemStore, FsOptions},
    key_builder::{KeyBuilder, ObjectKey},
    registry::{RegistryStore, UploadSizeReporting},
    staged_stream::{OpenedFile, StagedStream},
};
pub use store::{InMemoryObjectStore, LocalDiskStore, ObjectStore};
