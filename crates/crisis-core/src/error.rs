//! Error types for the Crisis Guide core

use crate::state::EscalationState;
use std::fmt;
use thiserror::Error;

/// Result type alias for crisis operations
pub type CrisisResult<T> = Result<T, CrisisError>;

/// External service the coordinator depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Agent,
    Telephony,
    Audit,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::Agent => "conversation agent",
            Collaborator::Telephony => "telephony gateway",
            Collaborator::Audit => "audit log",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while coordinating an emergency session
#[derive(Error, Debug)]
pub enum CrisisError {
    /// A collaborator failed or timed out. Recovered locally, never fatal to a session.
    #[error("{collaborator} unavailable: {detail}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        detail: String,
    },

    /// The event is not accepted in the session's current state.
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition {
        from: EscalationState,
        event: String,
    },

    #[error("duplicate call attempt for session {0}")]
    DuplicateCallAttempt(String),

    #[error("no emergency session for conversation {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CrisisError {
    pub fn unavailable(collaborator: Collaborator, detail: impl fmt::Display) -> Self {
        CrisisError::CollaboratorUnavailable {
            collaborator,
            detail: detail.to_string(),
        }
    }

    pub fn invalid(from: EscalationState, event: impl Into<String>) -> Self {
        CrisisError::InvalidTransition {
            from,
            event: event.into(),
        }
    }
}

impl From<config::ConfigError> for CrisisError {
    fn from(err: config::ConfigError) -> Self {
        CrisisError::Config(err.to_string())
    }
}
