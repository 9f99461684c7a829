//! Storage backends.
//!
//! - [`atomic_file`]: whole-file replacement with fsync and an exclusive lock
//! - [`blob`]: `BlobStore` implementations (in-memory and JSON files)

pub mod atomic_file;
pub mod blob;

pub use atomic_file::{AtomicFile, AtomicFileError};
pub use blob::{JsonFileBlobStore, MemoryBlobStore};
