//! Ticket lifecycle state machine — explicit statuses and legal transition
//! guards.
//!
//! Every ticket starts at `Received` and terminates at `Resolved`, a reviewer
//! outcome (`Escalated`, `Rejected`), or a stage failure status. Status moves
//! forward only; the transition table is the single source of truth for what
//! the orchestrator may do next, and every accepted transition is recorded in
//! the ticket's decision trail for audit.
//!
//! The two choice points in the pipeline — the post-classification escalation
//! check and the post-validation approval decision — are not statuses. They
//! are pure decisions whose outcome picks which legal edge to take.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IllegalTransition;

/// Lifecycle status of a support ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Created by ingestion, not yet picked up.
    Received,
    /// Attachment text extracted (or no attachments present).
    AttachmentsProcessed,
    /// Sensitive spans replaced with placeholders; pii_map populated.
    PiiRedacted,
    /// Intent classification attached, escalation lexicon applied.
    Classified,
    /// Retrieval gate evaluated; context judged sufficient or not.
    RetrievalDone,
    /// Draft reply produced (generated or synthetic deferral).
    Drafted,
    /// All five validation checks recorded.
    Validated,
    /// Suspended on a human reviewer; resume token outstanding.
    AwaitingReview,
    /// Reply dispatched to the customer.
    Sent,
    /// Terminal: reply delivered and audit trail closed.
    Resolved,
    /// Terminal: reviewer pulled the ticket out of the automated flow.
    Escalated,
    /// Terminal: reviewer rejected the draft outright.
    Rejected,
    /// Terminal: review window elapsed with no decision.
    ReviewTimedOut,

    // Terminal stage failures. Each raises an operator alert; a ticket is
    // never silently dropped.
    AttachmentsFailed,
    PiiFailed,
    ClassifyFailed,
    RetrievalFailed,
    GenerationFailed,
    ValidationFailed,
    SendFailed,
}

impl TicketStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved
                | Self::Escalated
                | Self::Rejected
                | Self::ReviewTimedOut
                | Self::AttachmentsFailed
                | Self::PiiFailed
                | Self::ClassifyFailed
                | Self::RetrievalFailed
                | Self::GenerationFailed
                | Self::ValidationFailed
                | Self::SendFailed
        )
    }

    /// Whether this is a terminal failure or timeout status that must have
    /// raised an operator alert.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::ReviewTimedOut
                | Self::AttachmentsFailed
                | Self::PiiFailed
                | Self::ClassifyFailed
                | Self::RetrievalFailed
                | Self::GenerationFailed
                | Self::ValidationFailed
                | Self::SendFailed
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Spell the snake_case wire form so log lines and serialized
        // tickets agree.
        let name = match self {
            Self::Received => "received",
            Self::AttachmentsProcessed => "attachments_processed",
            Self::PiiRedacted => "pii_redacted",
            Self::Classified => "classified",
            Self::RetrievalDone => "retrieval_done",
            Self::Drafted => "drafted",
            Self::Validated => "validated",
            Self::AwaitingReview => "awaiting_review",
            Self::Sent => "sent",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::Rejected => "rejected",
            Self::ReviewTimedOut => "review_timed_out",
            Self::AttachmentsFailed => "attachments_failed",
            Self::PiiFailed => "pii_failed",
            Self::ClassifyFailed => "classify_failed",
            Self::RetrievalFailed => "retrieval_failed",
            Self::GenerationFailed => "generation_failed",
            Self::ValidationFailed => "validation_failed",
            Self::SendFailed => "send_failed",
        };
        f.write_str(name)
    }
}

/// Legal transitions between ticket statuses.
///
/// ```text
/// Received             → AttachmentsProcessed | AttachmentsFailed
/// AttachmentsProcessed → PiiRedacted | AwaitingReview | PiiFailed
/// PiiRedacted          → Classified | ClassifyFailed
/// Classified           → RetrievalDone | AwaitingReview | RetrievalFailed
/// RetrievalDone        → Drafted | GenerationFailed
/// Drafted              → Validated | ValidationFailed
/// Validated            → Sent | AwaitingReview
/// AwaitingReview       → Sent | Escalated | Rejected | ReviewTimedOut
/// Sent                 → Resolved | SendFailed
/// ```
///
/// `AttachmentsProcessed → AwaitingReview` is the redaction dead-end edge:
/// when every detector layer fails, the ticket must reach a human without its
/// text ever being shown to a model. `Classified → AwaitingReview` is the
/// force-review edge that skips retrieval and generation entirely.
pub fn is_legal_transition(from: TicketStatus, to: TicketStatus) -> bool {
    use TicketStatus::*;

    matches!(
        (from, to),
        (Received, AttachmentsProcessed)
            | (Received, AttachmentsFailed)
            | (AttachmentsProcessed, PiiRedacted)
            | (AttachmentsProcessed, AwaitingReview)
            | (AttachmentsProcessed, PiiFailed)
            | (PiiRedacted, Classified)
            | (PiiRedacted, ClassifyFailed)
            | (Classified, RetrievalDone)
            | (Classified, AwaitingReview)
            | (Classified, RetrievalFailed)
            | (RetrievalDone, Drafted)
            | (RetrievalDone, GenerationFailed)
            | (Drafted, Validated)
            | (Drafted, ValidationFailed)
            | (Validated, Sent)
            | (Validated, AwaitingReview)
            | (AwaitingReview, Sent)
            | (AwaitingReview, Escalated)
            | (AwaitingReview, Rejected)
            | (AwaitingReview, ReviewTimedOut)
            | (Sent, Resolved)
            | (Sent, SendFailed)
    )
}

/// Validate a transition, returning the typed error on an illegal edge.
pub fn check_transition(
    from: TicketStatus,
    to: TicketStatus,
) -> Result<(), IllegalTransition> {
    if is_legal_transition(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}
