//! Async orchestration layer of the insurance support pipeline.
//!
//! The deterministic gates live in the `triage` crate; this crate wires them
//! to the outside world:
//!
//! - [`services`] — collaborator contracts (classification, generation,
//!   embedding, vector search, OCR, reviewer surface, delivery, alerting)
//! - [`store`] — the durable ticket store contract with optimistic
//!   versioning, plus the bundled in-memory implementation
//! - [`retry`] — per-stage timeouts and bounded exponential backoff
//! - [`review`] — the suspend-and-resume-by-token review protocol
//! - [`orchestrator`] — the pipeline driver and its public surface
//!   (`submit`, `status`, `resume_review`, `check_review_timeouts`)
//! - [`http`] — a JSON-over-HTTP inference client for the generation and
//!   embedding contracts

pub mod http;
pub mod orchestrator;
pub mod retry;
pub mod review;
pub mod services;
pub mod store;

// Re-export the orchestrator surface.
pub use orchestrator::{Orchestrator, OrchestratorError, Services, StatusSnapshot};

// Re-export the review protocol types.
pub use review::{ReviewError, ReviewRequest, ReviewerDecision};

// Re-export service contracts.
pub use services::{
    AlertKind, AlertSink, AttachmentProcessor, DraftGenerator, EntityDetector, GeneratedDraft,
    IntentClassifier, OperatorAlert, QueryEmbedder, ResponseDispatcher, ReviewChannel,
    VectorSearch,
};

// Re-export store types.
pub use store::{MemoryTicketStore, StoreError, TicketStore};

// Re-export retry primitives.
pub use retry::{run_stage, RetryPolicy};

// Re-export the HTTP inference client.
pub use http::{HttpInferenceClient, HttpInferenceConfig};
