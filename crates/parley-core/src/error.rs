//! Error types for the Parley engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the whole engine.
///
/// Variants are structured so callers can branch on the failure kind, and
/// common library errors convert automatically via `From`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParleyError {
    /// The session id is not present in the session table.
    #[error("Unknown session: '{0}'")]
    UnknownSession(String),

    /// The request id does not belong to the session.
    #[error("Unknown request: '{request_id}' in session '{session_id}'")]
    UnknownRequest {
        session_id: String,
        request_id: String,
    },

    /// The session never became usable.
    #[error("Session initialization failed: {0}")]
    InitializationError(String),

    /// The agent failed while producing a response.
    #[error("Agent invocation failed: {0}")]
    AgentInvocation(String),

    /// A variable resolver failed.
    #[error("Variable '{name}' could not be resolved: {message}")]
    VariableResolution { name: String, message: String },

    /// Persisted data could not be decoded.
    #[error("Malformed persisted data under '{key}': {message}")]
    MalformedPersistedData { key: String, message: String },

    /// An edit request did not name exactly one context target.
    #[error("Edit request must target exactly one document, got {0}")]
    EditTargetAmbiguous(usize),

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn unknown_session(session_id: impl Into<String>) -> Self {
        Self::UnknownSession(session_id.into())
    }

    pub fn unknown_request(session_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::UnknownRequest {
            session_id: session_id.into(),
            request_id: request_id.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn malformed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPersistedData {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    pub fn is_unknown_session(&self) -> bool {
        matches!(self, Self::UnknownSession(_))
    }

    pub fn is_initialization_error(&self) -> bool {
        matches!(self, Self::InitializationError(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    pub fn is_edit_target_ambiguous(&self) -> bool {
        matches!(self, Self::EditTargetAmbiguous(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for ParleyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Collaborators report failures through `anyhow`; they land here at the
/// engine boundary.
impl From<anyhow::Error> for ParleyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

/// A type alias for `Result<T, ParleyError>`.
pub type Result<T> = std::result::Result<T, ParleyError>;
