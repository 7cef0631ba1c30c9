//! Stage error taxonomy.
//!
//! Errors here cover *infrastructure* failures of pipeline stages. Safety
//! violations, insufficient retrieval context, and review timeouts are NOT
//! errors — they are expected routing outcomes carried as plain values and
//! always move the ticket forward to human review.
//!
//! Two classes:
//! - `Transient` — network faults, throttles, per-call timeouts. Retried with
//!   bounded backoff by the orchestrator.
//! - `Permanent` — malformed input, contract violations. Never retried; the
//!   ticket goes straight to the stage's terminal failure state plus an alert.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state_machine::TicketStatus;

/// The pipeline stages that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Attachments,
    Redaction,
    Classification,
    Retrieval,
    Generation,
    Validation,
    Send,
}

impl StageKind {
    /// The terminal failure status a ticket enters when this stage exhausts
    /// its retry budget (or fails permanently).
    pub fn failure_status(self) -> TicketStatus {
        match self {
            Self::Attachments => TicketStatus::AttachmentsFailed,
            Self::Redaction => TicketStatus::PiiFailed,
            Self::Classification => TicketStatus::ClassifyFailed,
            Self::Retrieval => TicketStatus::RetrievalFailed,
            Self::Generation => TicketStatus::GenerationFailed,
            Self::Validation => TicketStatus::ValidationFailed,
            Self::Send => TicketStatus::SendFailed,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attachments => write!(f, "attachments"),
            Self::Redaction => write!(f, "redaction"),
            Self::Classification => write!(f, "classification"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Generation => write!(f, "generation"),
            Self::Validation => write!(f, "validation"),
            Self::Send => write!(f, "send"),
        }
    }
}

/// A failure raised by a pipeline stage or one of its collaborator calls.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Retryable: the call may succeed on a later attempt.
    #[error("transient failure in {stage} stage: {message}")]
    Transient { stage: StageKind, message: String },

    /// Not retryable: retrying cannot change the outcome.
    #[error("permanent failure in {stage} stage: {message}")]
    Permanent { stage: StageKind, message: String },
}

impl StageError {
    /// Build a transient (retryable) error.
    pub fn transient(stage: StageKind, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    /// Build a permanent (non-retryable) error.
    pub fn permanent(stage: StageKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            stage,
            message: message.into(),
        }
    }

    /// Which stage raised this error.
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Transient { stage, .. } | Self::Permanent { stage, .. } => *stage,
        }
    }

    /// Whether the orchestrator should retry the stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Error returned when a status change would violate the state graph.
#[derive(Debug, Clone, Error)]
#[error("illegal ticket transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: TicketStatus,
    pub to: TicketStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = StageError::transient(StageKind::Retrieval, "throttled");
        assert!(err.is_retryable());
        assert_eq!(err.stage(), StageKind::Retrieval);
    }

    #[test]
    fn test_permanent_is_not_retryable() {
        let err = StageError::permanent(StageKind::Classification, "empty payload");
        assert!(!err.is_retryable());
        assert_eq!(err.stage(), StageKind::Classification);
    }

    #[test]
    fn test_display_includes_stage() {
        let err = StageError::transient(StageKind::Generation, "connection reset");
        let msg = err.to_string();
        assert!(msg.contains("generation"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_failure_status_mapping() {
        assert_eq!(
            StageKind::Redaction.failure_status(),
            TicketStatus::PiiFailed
        );
        assert_eq!(StageKind::Send.failure_status(), TicketStatus::SendFailed);
    }
}
