//! Application layer for Parley.
//!
//! Coordinates the domain model with agents, documents and storage: the chat
//! service that runs requests against sessions, and the edit sessions that
//! stream agent edits into live documents.

pub mod chat;
pub mod edit_session;
pub mod pending;
pub mod registry;

pub use chat::{ChatService, ChatServiceEvent, SendRequestHandle, SendRequestOptions};
pub use edit_session::{EditSessionCoordinator, EditSessionStatus};
pub use registry::{AgentRegistry, VariableRegistry};
