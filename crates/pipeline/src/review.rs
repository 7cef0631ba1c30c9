//! Human review handoff — suspend-and-resume-by-token.
//!
//! When a ticket needs a human, the orchestrator persists a one-time resume
//! token on the ticket, hands a [`ReviewRequest`] snapshot to the reviewer
//! surface, and releases all compute. The ticket re-enters the pipeline only
//! through [`crate::orchestrator::Orchestrator::resume_review`] with that
//! token, or through the timeout sweep once the review window (24h by
//! default) elapses.
//!
//! Exactly-once consumption is enforced by the store's conditional write,
//! not by an in-process lock: concurrent resumes both load the same ticket
//! version, one write wins, the other observes the version conflict and gets
//! [`ReviewError::TokenConsumed`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use triage::{ResumeToken, ReviewKind, Ticket};

use crate::store::StoreError;

/// Snapshot handed to the reviewer surface while a ticket is suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub token: ResumeToken,
    pub kind: ReviewKind,
    /// Full ticket snapshot, so the reviewer sees the draft, the violations,
    /// and the trail without another round-trip.
    pub ticket: Ticket,
}

/// A reviewer's verdict on a suspended ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewerDecision {
    /// Use the draft verbatim.
    Approve,
    /// Use the supplied replacement text instead of the draft.
    Edit { text: String },
    /// Stop the automated flow; nothing is sent.
    Reject { notes: String },
    /// Route to a specialist team; nothing is sent.
    Escalate { notes: String },
}

impl ReviewerDecision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Edit { .. } => "edit",
            Self::Reject { .. } => "reject",
            Self::Escalate { .. } => "escalate",
        }
    }
}

/// Errors resuming a suspended ticket.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// No suspended ticket carries this token.
    #[error("unknown resume token {0}")]
    UnknownToken(ResumeToken),

    /// The token was already consumed by a concurrent or earlier resume.
    #[error("resume token {0} already consumed")]
    TokenConsumed(ResumeToken),

    /// Approve requires a draft; force-reviewed tickets have none, so the
    /// reviewer must supply text via Edit (or reject/escalate).
    #[error("ticket {0} has no draft to approve")]
    NoDraftToApprove(triage::TicketId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] triage::IllegalTransition),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_names() {
        assert_eq!(ReviewerDecision::Approve.name(), "approve");
        assert_eq!(
            ReviewerDecision::Edit {
                text: "x".to_string()
            }
            .name(),
            "edit"
        );
        assert_eq!(
            ReviewerDecision::Reject {
                notes: "n".to_string()
            }
            .name(),
            "reject"
        );
    }

    #[test]
    fn test_decision_serde_tagging() {
        let json = serde_json::to_string(&ReviewerDecision::Edit {
            text: "fixed".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""decision":"edit""#));
        let back: ReviewerDecision = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ReviewerDecision::Edit { text } if text == "fixed"));
    }
}
