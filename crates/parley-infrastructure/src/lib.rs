//! Infrastructure layer for Parley.
//!
//! Concrete storage, document buffers, configuration loading and path
//! resolution behind the traits defined in `parley-core`.

pub mod config_service;
pub mod document;
pub mod paths;
pub mod session_store;
pub mod storage;
pub mod transfer_store;

pub use crate::config_service::ConfigService;
pub use crate::document::{FileDocumentProvider, MemoryDocumentProvider, TextDocument};
pub use crate::paths::ParleyPaths;
pub use crate::session_store::PersistedSessionStore;
pub use crate::storage::{JsonFileBlobStore, MemoryBlobStore};
pub use crate::transfer_store::{TransferEntry, TransferStore};
