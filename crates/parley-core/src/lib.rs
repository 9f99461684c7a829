//! Domain layer for Parley.
//!
//! Session state machine, request parsing, and the traits at every
//! collaborator seam (agents, documents, storage).

pub mod agent;
pub mod config;
pub mod document;
pub mod error;
pub mod parser;
pub mod session;
pub mod storage;

// Re-export common error type
pub use error::ParleyError;
