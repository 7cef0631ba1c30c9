//! Collaborator service contracts.
//!
//! Each external dependency of the pipeline sits behind one of these traits:
//! attachment OCR, intent classification, embedding, vector search, draft
//! generation (plus its independent groundedness verification pass), the
//! reviewer surface, customer delivery, and operator alerting. The
//! orchestrator only ever sees the trait, which is what lets every stage run
//! as a pure function over the ticket plus injected collaborators.
//!
//! Implementations map their transport failures onto
//! [`StageError::Transient`] / [`StageError::Permanent`] so the retry layer
//! can tell a throttle from a malformed request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use triage::redaction::PiiSpan;
use triage::retrieval::{RetrievalOutcome, ScoredChunk};
use triage::validation::GroundednessReport;
use triage::{ClassifierVerdict, StageError, Ticket, TicketId};

/// Extracts text from attachment references (OCR lives outside the core).
#[async_trait]
pub trait AttachmentProcessor: Send + Sync {
    async fn extract_text(&self, attachment_refs: &[String]) -> Result<String, StageError>;
}

/// External intent classification service. Only ever sees redacted text.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, redacted_text: &str) -> Result<ClassifierVerdict, StageError>;
}

/// Raw output of the generation service before it becomes a
/// [`triage::DraftReply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDraft {
    pub text: String,
    pub confidence: f64,
    pub cited_sources: Vec<String>,
    pub requires_escalation: bool,
    pub escalation_reason: Option<String>,
}

/// Language-generation service. Receives grounding context and must honor a
/// refusal-on-insufficient-context instruction; the core never calls it
/// without gated context.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate(
        &self,
        redacted_query: &str,
        context: &RetrievalOutcome,
    ) -> Result<GeneratedDraft, StageError>;

    /// Independent verification pass: compare the draft's factual claims
    /// against the exact retrieved chunks.
    async fn verify_groundedness(
        &self,
        draft_text: &str,
        chunks: &[ScoredChunk],
    ) -> Result<GroundednessReport, StageError>;
}

/// Embeds a redacted query for vector search.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed(&self, redacted_text: &str) -> Result<Vec<f32>, StageError>;
}

/// Vector similarity search over one named corpus.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        corpus: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StageError>;
}

/// Optional third redaction layer: a specialized entity model. Returns spans
/// in the text it was given; the deterministic engine applies them.
#[async_trait]
pub trait EntityDetector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<Vec<PiiSpan>, StageError>;
}

/// Delivers a review request to the human reviewer surface.
#[async_trait]
pub trait ReviewChannel: Send + Sync {
    async fn deliver(&self, request: &crate::review::ReviewRequest) -> Result<(), StageError>;
}

/// Sends the final, PII-restored reply to the customer over their channel.
#[async_trait]
pub trait ResponseDispatcher: Send + Sync {
    async fn dispatch(&self, ticket: &Ticket, final_text: &str) -> Result<(), StageError>;
}

/// Why the operator is being paged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A stage exhausted its retries or failed permanently.
    TerminalFailure,
    /// A review sat unanswered past the window.
    ReviewTimeout,
}

/// An operator alert. Raised exactly once per terminal failure or timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub ticket_id: TicketId,
    pub kind: AlertKind,
    pub message: String,
}

/// Notification sink for terminal failures and review timeouts. Alerting is
/// fire-and-forget: a broken sink must not take the pipeline down with it.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: OperatorAlert);
}
