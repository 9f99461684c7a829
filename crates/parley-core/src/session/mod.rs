//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: the per-session state machine (`SessionModel`)
//! - `request`: parsed user input and request records
//! - `response`: progress fragments, agent results, outcome classification
//! - `event`: change notifications (`SessionChange`)
//! - `snapshot`: persisted plain-data form, including legacy upgrades

mod event;
mod model;
mod request;
mod response;
mod snapshot;

pub use event::{RemovalReason, SessionChange};
pub use model::{InitState, SessionModel, WelcomeMessage};
pub use request::{ChatRequest, ParsedRequest, RequestPart, ResolvedVariable, VariableValue};
pub use response::{
    AgentResult, ChatResponse, ErrorDetails, FileTreeNode, Followup, ProgressFragment,
    ResponseOutcome, ResponseTimings, Vote,
};
pub use snapshot::{
    SNAPSHOT_VERSION, SerializableRequest, SerializableSession, SerializedFragment,
    SerializedMessage,
};
