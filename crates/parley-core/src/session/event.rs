use serde::{Deserialize, Serialize};

use super::response::{ProgressFragment, Vote};

/// Change notifications emitted by a [`SessionModel`](super::SessionModel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionChange {
    Initialized,
    RequestAdded {
        request_id: String,
    },
    ProgressAppended {
        request_id: String,
        fragment: ProgressFragment,
    },
    ResponseCompleted {
        request_id: String,
    },
    RequestRemoved {
        request_id: String,
        reason: RemovalReason,
    },
    FollowupsChanged {
        request_id: String,
    },
    VoteChanged {
        request_id: String,
        vote: Option<Vote>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The user discarded the request.
    Removal,
    /// The request is about to be sent again.
    Resend,
    /// The request moved to another session.
    Adoption,
}
