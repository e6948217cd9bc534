//! The adapter layer: paths and registry identities in, object-store calls out.

pub mod file_mode;
pub mod file_system;
pub mod key_builder;
pub mod registry;
pub mod staged_stream;
