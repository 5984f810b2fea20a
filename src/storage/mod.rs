//! Storage layer for dotbackup
//!
//! Provides the metadata store, atomic JSON writes, and the exclusive file
//! lock guarding store mutations.

pub mod file_io;
pub mod lock;
pub mod store;

pub use file_io::{read_json_required, write_json_atomic};
pub use lock::StoreLock;
pub use store::{Document, MetadataStore};
