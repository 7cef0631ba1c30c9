//! The ticket aggregate — the single record that accumulates state as it
//! moves through the pipeline.
//!
//! Stages append fields and never delete prior ones (audit requirement): the
//! raw text stays for final PII restoration, the redacted text is what every
//! model-facing call sees, and the decision trail records why each routing
//! choice was made. Only the orchestrator changes `status`, and only through
//! [`Ticket::transition`], which enforces the state graph.
//!
//! `version` implements the store's optimistic-concurrency contract; `owner`
//! is the exclusive processing lease that keeps two orchestrator instances
//! off the same ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Classification;
use crate::error::IllegalTransition;
use crate::redaction::PiiMap;
use crate::retrieval::RetrievalOutcome;
use crate::state_machine::{check_transition, TicketStatus};
use crate::validation::ValidationOutcome;

/// Opaque unique ticket identifier, assigned at creation, immutable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One-time identifier correlating a suspended ticket with the human decision
/// that resumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Uuid);

impl ResumeToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Source channel of the customer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Chat,
    Other,
}

/// Normalized ticket-creation event delivered by the ingestion source. The
/// core never parses raw channel formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketCreationEvent {
    pub channel: Channel,
    pub customer_ref: String,
    pub text: String,
    pub attachment_refs: Vec<String>,
}

/// A draft reply, either model-generated or the synthetic deferral used when
/// retrieval context was insufficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftReply {
    pub text: String,
    pub confidence: f64,
    pub cited_sources: Vec<String>,
    pub requires_escalation: bool,
    pub escalation_reason: Option<String>,
    /// True for the canned deferral draft; it makes no factual claims.
    pub synthetic: bool,
}

impl DraftReply {
    /// The canned deferral produced instead of calling the generator when
    /// retrieval context is insufficient.
    pub fn deferral(max_score: f64) -> Self {
        Self {
            text: "Thank you for reaching out. I want to make sure I give you \
                   accurate information regarding your query. Let me connect \
                   you with a specialist who can help with this specific \
                   question. A team member will be in touch shortly."
                .to_string(),
            confidence: 0.0,
            cited_sources: Vec::new(),
            requires_escalation: true,
            escalation_reason: Some(format!(
                "insufficient retrieval context (max_score={max_score:.3})"
            )),
            synthetic: true,
        }
    }
}

/// Why a ticket is waiting on a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// Force-reviewed before retrieval/generation; there is no draft.
    ImmediateEscalation,
    /// A draft exists and needs sign-off.
    DraftReview,
}

/// Suspension bookkeeping persisted on the ticket while it awaits review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewState {
    pub token: ResumeToken,
    pub kind: ReviewKind,
    pub issued_at: DateTime<Utc>,
}

/// One audit entry. The trail is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailEntry {
    pub at: DateTime<Utc>,
    pub stage: String,
    pub detail: String,
}

/// The central aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub channel: Channel,
    pub customer_ref: String,

    /// Original message, retained for final PII restoration.
    pub raw_text: String,
    pub attachment_refs: Vec<String>,
    /// Text extracted from attachments, appended to the redaction input.
    pub attachment_text: Option<String>,
    /// Placeholder-substituted text — the only form any model ever sees.
    pub redacted_text: Option<String>,
    pub pii_map: PiiMap,

    pub classification: Option<Classification>,
    /// Absent when escalation bypassed retrieval.
    pub retrieval: Option<RetrievalOutcome>,
    pub draft: Option<DraftReply>,
    pub validation: Option<ValidationOutcome>,

    pub status: TicketStatus,
    pub review: Option<ReviewState>,
    pub reviewer_notes: Option<String>,
    /// Approved reply with PII restored, set at send time.
    pub final_text: Option<String>,

    /// Append-only audit log of every decision made and why.
    pub decision_trail: Vec<TrailEntry>,

    /// Optimistic-concurrency counter, bumped by the store on every write.
    pub version: u64,
    /// Exclusive processing lease held by at most one orchestrator instance.
    pub owner: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Create a fresh ticket from an ingestion event.
    pub fn from_event(event: TicketCreationEvent) -> Self {
        let now = Utc::now();
        Self {
            id: TicketId::new(),
            channel: event.channel,
            customer_ref: event.customer_ref,
            raw_text: event.text,
            attachment_refs: event.attachment_refs,
            attachment_text: None,
            redacted_text: None,
            pii_map: PiiMap::new(),
            classification: None,
            retrieval: None,
            draft: None,
            validation: None,
            status: TicketStatus::Received,
            review: None,
            reviewer_notes: None,
            final_text: None,
            decision_trail: Vec::new(),
            version: 0,
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The full text handed to redaction: message body plus any extracted
    /// attachment content.
    pub fn redaction_input(&self) -> String {
        match &self.attachment_text {
            Some(extra) if !extra.is_empty() => {
                format!("{}\n\n[Attachment Content]\n{}", self.raw_text, extra)
            }
            _ => self.raw_text.clone(),
        }
    }

    /// Append an audit entry.
    pub fn record(&mut self, stage: &str, detail: impl Into<String>) {
        self.decision_trail.push(TrailEntry {
            at: Utc::now(),
            stage: stage.to_string(),
            detail: detail.into(),
        });
    }

    /// Move to a new status, enforcing the state graph and recording the
    /// transition in the trail.
    pub fn transition(
        &mut self,
        to: TicketStatus,
        reason: &str,
    ) -> Result<(), IllegalTransition> {
        check_transition(self.status, to)?;
        tracing::debug!(ticket = %self.id, from = %self.status, to = %to, reason, "status transition");
        self.record("transition", format!("{} -> {}: {}", self.status, to, reason));
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> TicketCreationEvent {
        TicketCreationEvent {
            channel: Channel::Email,
            customer_ref: "cust-42".to_string(),
            text: "What is my storm excess?".to_string(),
            attachment_refs: vec![],
        }
    }

    #[test]
    fn test_new_ticket_starts_received() {
        let ticket = Ticket::from_event(event());
        assert_eq!(ticket.status, TicketStatus::Received);
        assert_eq!(ticket.version, 0);
        assert!(ticket.owner.is_none());
        assert!(ticket.decision_trail.is_empty());
    }

    #[test]
    fn test_legal_transition_is_recorded() {
        let mut ticket = Ticket::from_event(event());
        ticket
            .transition(TicketStatus::AttachmentsProcessed, "no attachments")
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::AttachmentsProcessed);
        assert_eq!(ticket.decision_trail.len(), 1);
        assert!(ticket.decision_trail[0].detail.contains("no attachments"));
    }

    #[test]
    fn test_illegal_transition_leaves_ticket_untouched() {
        let mut ticket = Ticket::from_event(event());
        let err = ticket
            .transition(TicketStatus::Drafted, "skip ahead")
            .unwrap_err();
        assert_eq!(err.from, TicketStatus::Received);
        assert_eq!(err.to, TicketStatus::Drafted);
        assert_eq!(ticket.status, TicketStatus::Received);
        assert!(ticket.decision_trail.is_empty());
    }

    #[test]
    fn test_redaction_input_includes_attachment_text() {
        let mut ticket = Ticket::from_event(event());
        assert_eq!(ticket.redaction_input(), "What is my storm excess?");

        ticket.attachment_text = Some("Policy POL-123456 scan".to_string());
        let input = ticket.redaction_input();
        assert!(input.contains("What is my storm excess?"));
        assert!(input.contains("[Attachment Content]"));
        assert!(input.contains("POL-123456"));
    }

    #[test]
    fn test_deferral_draft_shape() {
        let draft = DraftReply::deferral(0.63);
        assert!(draft.synthetic);
        assert!(draft.requires_escalation);
        assert_eq!(draft.confidence, 0.0);
        assert!(draft.escalation_reason.unwrap().contains("0.630"));
        assert!(draft.text.contains("specialist"));
    }

    #[test]
    fn test_ticket_serde_round_trip() {
        let mut ticket = Ticket::from_event(event());
        ticket.record("submit", "created");
        let json = serde_json::to_string(&ticket).unwrap();
        let back: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, ticket.id);
        assert_eq!(back.status, TicketStatus::Received);
        assert_eq!(back.decision_trail.len(), 1);
    }
}
