//! Chat sessions and the request dispatcher.

mod dispatch;
mod events;
mod service;

pub use dispatch::{SendRequestHandle, SendRequestOptions};
pub use events::{ChatServiceEvent, DisposeReason, HistoryItem, TransferredSessionData, UserAction};
pub use service::{ChatService, SharedSession};
