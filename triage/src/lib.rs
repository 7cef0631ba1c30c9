//! Deterministic core of the insurance support pipeline.
//!
//! This crate holds everything that must be reproducible from its inputs:
//! the ticket data model and lifecycle state machine, the PII redaction
//! gateway, the retrieval-sufficiency gate, the five-check response
//! validation engine, and the approval decision policy. No LLM calls happen
//! here — model-facing collaborators live behind the async seams of the
//! `ticket-pipeline` crate, which feeds their outputs into these gates.
//!
//! # Design
//!
//! ```text
//! redact → classify (+ lexicon override) → [force review?]
//!        → retrieval gate → draft → validation engine → approval policy
//! ```
//!
//! Every routing decision is a pure function of the ticket plus a versioned
//! [`config::PipelineConfig`] snapshot, so a recorded decision can be
//! replayed and audited.

pub mod classify;
pub mod config;
pub mod error;
pub mod policy;
pub mod redaction;
pub mod retrieval;
pub mod state_machine;
pub mod ticket;
pub mod validation;

// Re-export the aggregate and its building blocks.
pub use ticket::{
    Channel, DraftReply, ResumeToken, ReviewKind, ReviewState, Ticket, TicketCreationEvent,
    TicketId, TrailEntry,
};

// Re-export state machine types.
pub use state_machine::{check_transition, is_legal_transition, TicketStatus};

// Re-export classification types.
pub use classify::{apply_escalation_rules, Classification, ClassifierVerdict, IntentKind, Priority};

// Re-export redaction types.
pub use redaction::{
    apply_spans, restore, DetectorError, DomainPatternDetector, GeneralPiiDetector,
    LayeredRedaction, PiiDetector, PiiEntry, PiiMap, PiiSpan, RedactionFailure, Redactor,
};

// Re-export retrieval gate types.
pub use retrieval::{RetrievalGate, RetrievalOutcome, ScoredChunk};

// Re-export validation engine types.
pub use validation::{
    CheckReport, GroundednessReport, Severity, ValidationEngine, ValidationOutcome, Violation,
    ViolationKind,
};

// Re-export the decision policy.
pub use policy::{decide, ApprovalDecision, PolicyDecision};

// Re-export configuration and errors.
pub use config::{ConfigError, PipelineConfig, RetryConfig};
pub use error::{IllegalTransition, StageError, StageKind};
