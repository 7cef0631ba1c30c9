//! The ticket orchestrator — sequences every stage, owns retry/timeout
//! policy, and implements the pause/resume protocol for human review.
//!
//! ```text
//! Received
//!   → attachments → redaction → classification ─┬─ force_review ──→ AwaitingReview
//!                                               └─ retrieval gate → generation
//!                                                  → validation → approval decision
//!                                                     ├─ AutoApprove → Sent → Resolved
//!                                                     └─ HumanReview → AwaitingReview
//! AwaitingReview ── resume(token) ──→ Sent | Escalated | Rejected
//!                ── 24h unanswered ─→ ReviewTimedOut (+ one alert)
//! ```
//!
//! Exactly-once processing rests on the store's conditional writes: the
//! orchestrator claims an owner lease before mutating and every persist names
//! the version it read, so a concurrent instance loses the race instead of
//! double-processing. Suspension releases the lease and all compute; the only
//! re-entry points are a reviewer callback or the timeout sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use triage::redaction::{apply_spans, restore, LayeredRedaction, Redactor};
use triage::validation::{GroundednessReport, ValidationEngine};
use triage::{
    apply_escalation_rules, decide, ApprovalDecision, DraftReply, IllegalTransition, IntentKind,
    PipelineConfig, ResumeToken, RetrievalGate, ReviewKind, ReviewState, ScoredChunk, StageError,
    StageKind, Ticket, TicketCreationEvent, TicketId, TicketStatus,
};

use crate::retry::{run_stage, RetryPolicy};
use crate::review::{ReviewError, ReviewRequest, ReviewerDecision};
use crate::services::{
    AlertKind, AlertSink, AttachmentProcessor, DraftGenerator, EntityDetector, IntentClassifier,
    OperatorAlert, QueryEmbedder, ResponseDispatcher, ReviewChannel, VectorSearch,
};
use crate::store::{StoreError, TicketStore};

/// The injected collaborator set.
pub struct Services {
    pub attachments: Arc<dyn AttachmentProcessor>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub embedder: Arc<dyn QueryEmbedder>,
    pub search: Arc<dyn VectorSearch>,
    pub generator: Arc<dyn DraftGenerator>,
    /// Optional third redaction layer (specialized entity model).
    pub entities: Option<Arc<dyn EntityDetector>>,
    pub review: Arc<dyn ReviewChannel>,
    pub dispatcher: Arc<dyn ResponseDispatcher>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Errors surfaced by the orchestrator's public API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    /// Another orchestrator instance holds the processing lease.
    #[error("ticket {0} is owned by another orchestrator instance")]
    TicketBusy(TicketId),
}

/// Point-in-time view returned by [`Orchestrator::status`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub id: TicketId,
    pub status: TicketStatus,
    pub intent: Option<IntentKind>,
    pub awaiting_review_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub trail_entries: usize,
}

pub struct Orchestrator {
    config: PipelineConfig,
    policy: RetryPolicy,
    redactor: Redactor,
    validator: ValidationEngine,
    store: Arc<dyn TicketStore>,
    services: Services,
    /// Lease identity of this orchestrator instance.
    instance: String,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        services: Services,
        store: Arc<dyn TicketStore>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        let validator = ValidationEngine::new(&config);
        Self {
            policy,
            validator,
            redactor: Redactor::standard(),
            store,
            services,
            instance: format!("orchestrator-{}", uuid::Uuid::new_v4()),
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Accept a ticket-creation event and drive the ticket until it either
    /// suspends on a reviewer or reaches a terminal state.
    pub async fn submit(
        &self,
        event: TicketCreationEvent,
    ) -> Result<TicketId, OrchestratorError> {
        let mut ticket = Ticket::from_event(event);
        let id = ticket.id;
        ticket.record("submit", format!("received via {:?}", ticket.channel));
        self.store.insert(ticket).await?;
        tracing::info!(ticket = %id, "ticket submitted");
        self.process(id).await?;
        Ok(id)
    }

    /// Drive a ticket forward from its current status. Returns the status the
    /// ticket rested at (terminal or `AwaitingReview`).
    pub async fn process(&self, id: TicketId) -> Result<TicketStatus, OrchestratorError> {
        let mut ticket = self.claim(id).await?;

        loop {
            let flow = match ticket.status {
                TicketStatus::Received => self.stage_attachments(&mut ticket).await?,
                TicketStatus::AttachmentsProcessed => self.stage_redaction(&mut ticket).await?,
                TicketStatus::PiiRedacted => self.stage_classification(&mut ticket).await?,
                TicketStatus::Classified => self.stage_escalation_or_retrieval(&mut ticket).await?,
                TicketStatus::RetrievalDone => self.stage_generation(&mut ticket).await?,
                TicketStatus::Drafted => self.stage_validation(&mut ticket).await?,
                TicketStatus::Validated => self.stage_approval_decision(&mut ticket).await?,
                TicketStatus::Sent => self.stage_dispatch(&mut ticket, "auto").await?,
                _ => Flow::Rest,
            };
            match flow {
                Flow::Continue => {}
                Flow::Rest => break,
            }
        }

        if ticket.status.is_terminal() && ticket.owner.is_some() {
            ticket.owner = None;
            self.persist(&mut ticket).await?;
        }
        Ok(ticket.status)
    }

    /// Current status view for a ticket.
    pub async fn status(&self, id: TicketId) -> Result<StatusSnapshot, OrchestratorError> {
        let ticket = self.store.get(id).await?;
        Ok(StatusSnapshot {
            id: ticket.id,
            status: ticket.status,
            intent: ticket.classification.as_ref().map(|c| c.intent),
            awaiting_review_since: ticket.review.as_ref().map(|r| r.issued_at),
            updated_at: ticket.updated_at,
            trail_entries: ticket.decision_trail.len(),
        })
    }

    /// Resume a suspended ticket with a reviewer decision. The resume token
    /// is one-time: of two concurrent calls, exactly one succeeds and the
    /// other observes [`ReviewError::TokenConsumed`].
    pub async fn resume_review(
        &self,
        token: ResumeToken,
        decision: ReviewerDecision,
    ) -> Result<(), ReviewError> {
        let awaiting = self.store.by_status(TicketStatus::AwaitingReview).await?;
        let mut ticket = awaiting
            .into_iter()
            .find(|t| t.review.as_ref().map(|r| r.token) == Some(token))
            .ok_or(ReviewError::UnknownToken(token))?;

        tracing::info!(
            ticket = %ticket.id,
            decision = decision.name(),
            "reviewer decision received"
        );
        ticket.record("review", format!("reviewer decision: {}", decision.name()));

        match decision {
            ReviewerDecision::Approve => {
                if ticket.draft.is_none() {
                    return Err(ReviewError::NoDraftToApprove(ticket.id));
                }
                ticket.transition(TicketStatus::Sent, "reviewer approved draft verbatim")?;
                let mut ticket = self.consume_token(ticket, token).await?;
                if let Err(e) = self.stage_dispatch(&mut ticket, "reviewer").await {
                    tracing::error!(ticket = %ticket.id, error = %e, "dispatch after approval failed");
                }
            }
            ReviewerDecision::Edit { text } => {
                ticket.draft = Some(DraftReply {
                    text,
                    confidence: 1.0,
                    cited_sources: ticket
                        .draft
                        .as_ref()
                        .map(|d| d.cited_sources.clone())
                        .unwrap_or_default(),
                    requires_escalation: false,
                    escalation_reason: None,
                    synthetic: false,
                });
                ticket.transition(TicketStatus::Sent, "reviewer supplied replacement text")?;
                let mut ticket = self.consume_token(ticket, token).await?;
                if let Err(e) = self.stage_dispatch(&mut ticket, "reviewer").await {
                    tracing::error!(ticket = %ticket.id, error = %e, "dispatch after edit failed");
                }
            }
            ReviewerDecision::Reject { notes } => {
                ticket.reviewer_notes = Some(notes);
                ticket.transition(TicketStatus::Rejected, "reviewer rejected draft")?;
                self.consume_token(ticket, token).await?;
            }
            ReviewerDecision::Escalate { notes } => {
                ticket.reviewer_notes = Some(notes);
                ticket.transition(TicketStatus::Escalated, "reviewer escalated to specialist")?;
                self.consume_token(ticket, token).await?;
            }
        }
        Ok(())
    }

    /// Sweep suspended tickets past the review window into `ReviewTimedOut`.
    /// Returns how many tickets timed out; each raises exactly one alert
    /// (guaranteed by the conditional write — a concurrent resume wins the
    /// race instead).
    pub async fn check_review_timeouts(&self) -> Result<usize, OrchestratorError> {
        self.check_review_timeouts_at(Utc::now()).await
    }

    /// Timeout sweep against an explicit clock, for logical-time tests.
    pub async fn check_review_timeouts_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, OrchestratorError> {
        let window = chrono::Duration::hours(self.config.review_timeout_hours);
        let mut timed_out = 0;

        for mut ticket in self.store.by_status(TicketStatus::AwaitingReview).await? {
            let issued_at = match &ticket.review {
                Some(review) => review.issued_at,
                None => continue,
            };
            if now - issued_at < window {
                continue;
            }

            let expected = ticket.version;
            ticket.transition(
                TicketStatus::ReviewTimedOut,
                &format!(
                    "no reviewer decision within {}h",
                    self.config.review_timeout_hours
                ),
            )?;
            match self.store.put(ticket.clone(), expected).await {
                Ok(stored) => {
                    timed_out += 1;
                    tracing::error!(ticket = %stored.id, "review timed out");
                    self.services
                        .alerts
                        .raise(OperatorAlert {
                            ticket_id: stored.id,
                            kind: AlertKind::ReviewTimeout,
                            message: format!(
                                "ticket {} sat in review past the {}h window",
                                stored.id, self.config.review_timeout_hours
                            ),
                        })
                        .await;
                }
                // A reviewer resumed concurrently; their decision stands.
                Err(StoreError::VersionConflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(timed_out)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn stage_attachments(&self, ticket: &mut Ticket) -> Result<Flow, OrchestratorError> {
        if ticket.attachment_refs.is_empty() {
            ticket.transition(TicketStatus::AttachmentsProcessed, "no attachments")?;
            self.persist(ticket).await?;
            return Ok(Flow::Continue);
        }

        let refs = ticket.attachment_refs.clone();
        let attachments = self.services.attachments.clone();
        let result = run_stage(&self.policy, StageKind::Attachments, || {
            let refs = refs.clone();
            let attachments = attachments.clone();
            async move { attachments.extract_text(&refs).await }
        })
        .await;

        match result {
            Ok(text) => {
                ticket.attachment_text = Some(text);
                ticket.transition(
                    TicketStatus::AttachmentsProcessed,
                    &format!("extracted text from {} attachment(s)", refs.len()),
                )?;
                self.persist(ticket).await?;
                Ok(Flow::Continue)
            }
            Err(e) => self.fail_stage(ticket, StageKind::Attachments, e).await,
        }
    }

    /// Layered redaction: the two deterministic layers, then the optional
    /// entity model. A dead redaction pipeline routes the ticket to a human
    /// with its text never having reached a model.
    async fn stage_redaction(&self, ticket: &mut Ticket) -> Result<Flow, OrchestratorError> {
        let input = ticket.redaction_input();

        let layered = match self.redactor.redact(&input) {
            Ok(layered) => layered,
            Err(failure) => {
                // Built-in layers are all down; the entity model is the last
                // resort before a forced human review.
                match self.entity_spans(&input).await {
                    Some(spans) => {
                        let mut map = triage::PiiMap::new();
                        let text = apply_spans(&input, &spans, &mut map);
                        LayeredRedaction {
                            text,
                            map,
                            failed_layers: failure.errors,
                        }
                    }
                    None => {
                        tracing::error!(ticket = %ticket.id, "all redaction layers failed");
                        ticket.record(
                            "redaction",
                            "all detector layers failed; forcing human review",
                        );
                        return self
                            .suspend(
                                ticket,
                                ReviewKind::ImmediateEscalation,
                                "redaction unavailable, ticket must not reach a model",
                            )
                            .await;
                    }
                }
            }
        };

        let mut text = layered.text;
        let mut map = layered.map;
        if !layered.failed_layers.is_empty() {
            ticket.record(
                "redaction",
                format!("degraded layers: {}", layered.failed_layers.join(", ")),
            );
        }

        // Optional layer 3 over the output of the deterministic layers.
        if let Some(spans) = self.entity_spans(&text).await {
            text = apply_spans(&text, &spans, &mut map);
        }

        ticket.redacted_text = Some(text);
        let detected = map.len();
        ticket.pii_map = map;
        ticket.transition(
            TicketStatus::PiiRedacted,
            &format!("{detected} PII entit(ies) masked"),
        )?;
        self.persist(ticket).await?;
        Ok(Flow::Continue)
    }

    /// Run the optional entity-model layer, degrading silently to "no spans"
    /// on failure (the deterministic layers have already run).
    async fn entity_spans(&self, text: &str) -> Option<Vec<triage::PiiSpan>> {
        let detector = self.services.entities.as_ref()?;
        let detector = detector.clone();
        let owned = text.to_string();
        match run_stage(&self.policy, StageKind::Redaction, || {
            let detector = detector.clone();
            let text = owned.clone();
            async move { detector.detect(&text).await }
        })
        .await
        {
            Ok(spans) => Some(spans),
            Err(e) => {
                tracing::warn!(error = %e, "entity model layer failed, degrading");
                None
            }
        }
    }

    async fn stage_classification(&self, ticket: &mut Ticket) -> Result<Flow, OrchestratorError> {
        let redacted = ticket.redacted_text.clone().unwrap_or_default();
        let classifier = self.services.classifier.clone();
        let result = run_stage(&self.policy, StageKind::Classification, || {
            let classifier = classifier.clone();
            let text = redacted.clone();
            async move {
                if text.trim().is_empty() {
                    return Ok(triage::ClassifierVerdict::empty_message());
                }
                classifier.classify(&text).await
            }
        })
        .await;

        match result {
            Ok(verdict) => {
                let classification = apply_escalation_rules(&redacted, verdict, &self.config);
                ticket.record(
                    "classification",
                    format!(
                        "intent={} confidence={:.2} force_review={}",
                        classification.intent, classification.confidence,
                        classification.force_review
                    ),
                );
                ticket.classification = Some(classification);
                ticket.transition(TicketStatus::Classified, "classifier verdict recorded")?;
                self.persist(ticket).await?;
                Ok(Flow::Continue)
            }
            Err(e) => self.fail_stage(ticket, StageKind::Classification, e).await,
        }
    }

    /// The escalation choice point: force-reviewed tickets go straight to a
    /// human — the model never sees them unnecessarily.
    async fn stage_escalation_or_retrieval(
        &self,
        ticket: &mut Ticket,
    ) -> Result<Flow, OrchestratorError> {
        let force = ticket
            .classification
            .as_ref()
            .map(|c| c.force_review)
            .unwrap_or(false);
        if force {
            return self
                .suspend(
                    ticket,
                    ReviewKind::ImmediateEscalation,
                    "escalation keywords force immediate human review",
                )
                .await;
        }
        self.stage_retrieval(ticket).await
    }

    async fn stage_retrieval(&self, ticket: &mut Ticket) -> Result<Flow, OrchestratorError> {
        let redacted = ticket.redacted_text.clone().unwrap_or_default();

        let embedder = self.services.embedder.clone();
        let embedding = match run_stage(&self.policy, StageKind::Retrieval, || {
            let embedder = embedder.clone();
            let text = redacted.clone();
            async move { embedder.embed(&text).await }
        })
        .await
        {
            Ok(embedding) => embedding,
            Err(e) => {
                // No embedding means no grounded answer — an expected
                // deferral outcome, not a pipeline failure.
                tracing::warn!(ticket = %ticket.id, error = %e, "embedding failed, deferring");
                ticket.record("retrieval", "query embedding failed; insufficient context");
                ticket.retrieval = Some(triage::RetrievalOutcome::insufficient(0.0, 0));
                ticket.transition(TicketStatus::RetrievalDone, "embedding unavailable")?;
                self.persist(ticket).await?;
                return Ok(Flow::Continue);
            }
        };

        let mut candidates: Vec<ScoredChunk> = Vec::new();
        let mut corpus_errors = 0usize;
        for corpus in &self.config.corpora {
            let search = self.services.search.clone();
            let result = run_stage(&self.policy, StageKind::Retrieval, || {
                let search = search.clone();
                let corpus = corpus.clone();
                let embedding = embedding.clone();
                let top_k = self.config.top_k;
                async move { search.search(&corpus, &embedding, top_k).await }
            })
            .await;
            match result {
                Ok(chunks) => candidates.extend(chunks),
                Err(e) => {
                    corpus_errors += 1;
                    tracing::warn!(corpus = %corpus, error = %e, "corpus search failed");
                }
            }
        }

        if corpus_errors == self.config.corpora.len() && !self.config.corpora.is_empty() {
            return self
                .fail_stage(
                    ticket,
                    StageKind::Retrieval,
                    StageError::transient(StageKind::Retrieval, "every corpus search failed"),
                )
                .await;
        }

        let outcome = RetrievalGate::new(&self.config).evaluate(candidates);
        ticket.record(
            "retrieval",
            format!(
                "sufficient={} max_score={:.3} searched={} kept={}",
                outcome.sufficient,
                outcome.max_score,
                outcome.searched,
                outcome.chunks.len()
            ),
        );
        let reason = if outcome.sufficient {
            "context sufficient"
        } else {
            "context below similarity threshold"
        };
        ticket.retrieval = Some(outcome);
        ticket.transition(TicketStatus::RetrievalDone, reason)?;
        self.persist(ticket).await?;
        Ok(Flow::Continue)
    }

    async fn stage_generation(&self, ticket: &mut Ticket) -> Result<Flow, OrchestratorError> {
        let retrieval = ticket
            .retrieval
            .clone()
            .unwrap_or_else(|| triage::RetrievalOutcome::insufficient(0.0, 0));

        // Strict mode: no sufficient context, no generator call. The
        // customer gets an explicit deferral instead of a confident guess.
        if !retrieval.sufficient {
            let draft = DraftReply::deferral(retrieval.max_score);
            ticket.record("generation", "insufficient context; synthetic deferral draft");
            ticket.draft = Some(draft);
            ticket.transition(TicketStatus::Drafted, "deferral drafted without generation")?;
            self.persist(ticket).await?;
            return Ok(Flow::Continue);
        }

        let redacted = ticket.redacted_text.clone().unwrap_or_default();
        let generator = self.services.generator.clone();
        let result = run_stage(&self.policy, StageKind::Generation, || {
            let generator = generator.clone();
            let query = redacted.clone();
            let context = retrieval.clone();
            async move { generator.generate(&query, &context).await }
        })
        .await;

        match result {
            Ok(generated) => {
                ticket.record(
                    "generation",
                    format!(
                        "draft generated, confidence={:.2}, {} citation(s)",
                        generated.confidence,
                        generated.cited_sources.len()
                    ),
                );
                ticket.draft = Some(DraftReply {
                    text: generated.text,
                    confidence: generated.confidence.clamp(0.0, 1.0),
                    cited_sources: generated.cited_sources,
                    requires_escalation: generated.requires_escalation,
                    escalation_reason: generated.escalation_reason,
                    synthetic: false,
                });
                ticket.transition(TicketStatus::Drafted, "draft reply generated")?;
                self.persist(ticket).await?;
                Ok(Flow::Continue)
            }
            Err(e) => self.fail_stage(ticket, StageKind::Generation, e).await,
        }
    }

    async fn stage_validation(&self, ticket: &mut Ticket) -> Result<Flow, OrchestratorError> {
        let Some(draft) = ticket.draft.clone() else {
            return self
                .fail_stage(
                    ticket,
                    StageKind::Validation,
                    StageError::permanent(StageKind::Validation, "drafted ticket has no draft"),
                )
                .await;
        };

        // The groundedness verdict comes from an independent verification
        // pass; if the pass is unavailable the engine fails the check closed.
        let groundedness: Option<GroundednessReport> = if draft.synthetic {
            None
        } else {
            let chunks = ticket
                .retrieval
                .as_ref()
                .map(|r| r.chunks.clone())
                .unwrap_or_default();
            let generator = self.services.generator.clone();
            let text = draft.text.clone();
            match run_stage(&self.policy, StageKind::Validation, || {
                let generator = generator.clone();
                let text = text.clone();
                let chunks = chunks.clone();
                async move { generator.verify_groundedness(&text, &chunks).await }
            })
            .await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(error = %e, "groundedness pass unavailable, failing closed");
                    None
                }
            }
        };

        let outcome = self.validator.validate(
            &ticket.raw_text,
            &draft,
            &ticket.pii_map,
            groundedness.as_ref(),
        );
        ticket.record(
            "validation",
            format!(
                "passed={} violations={:?} severity={:?}",
                outcome.passed,
                outcome.violation_kinds(),
                outcome.severity
            ),
        );
        ticket.validation = Some(outcome);
        ticket.transition(TicketStatus::Validated, "all five checks recorded")?;
        self.persist(ticket).await?;
        Ok(Flow::Continue)
    }

    /// The approval choice point.
    async fn stage_approval_decision(
        &self,
        ticket: &mut Ticket,
    ) -> Result<Flow, OrchestratorError> {
        let (Some(classification), Some(validation)) =
            (ticket.classification.clone(), ticket.validation.clone())
        else {
            // A validated ticket always carries both records; if one is
            // missing the safe route is a human, not an auto-send.
            ticket.record("approval_decision", "pipeline record missing; deferring to human");
            return self
                .suspend(ticket, ReviewKind::DraftReview, "incomplete pipeline records")
                .await;
        };

        let outcome = decide(
            &classification,
            ticket.retrieval.as_ref(),
            &validation,
            &self.config,
        );
        ticket.record(
            "approval_decision",
            format!(
                "{} (config v{}): {}",
                outcome.decision, outcome.config_version, outcome.reason
            ),
        );

        match outcome.decision {
            ApprovalDecision::AutoApprove => {
                ticket.transition(TicketStatus::Sent, &outcome.reason)?;
                self.persist(ticket).await?;
                Ok(Flow::Continue)
            }
            ApprovalDecision::HumanReview => {
                self.suspend(ticket, ReviewKind::DraftReview, &outcome.reason)
                    .await
            }
            ApprovalDecision::Escalate => {
                self.suspend(ticket, ReviewKind::ImmediateEscalation, &outcome.reason)
                    .await
            }
        }
    }

    /// Restore PII into the approved text and deliver it. Runs while the
    /// ticket is in `Sent`; success closes the ticket at `Resolved`.
    async fn stage_dispatch(
        &self,
        ticket: &mut Ticket,
        approved_by: &str,
    ) -> Result<Flow, OrchestratorError> {
        let Some(draft) = ticket.draft.clone() else {
            return self
                .fail_stage(
                    ticket,
                    StageKind::Send,
                    StageError::permanent(StageKind::Send, "sent ticket has no approved draft"),
                )
                .await;
        };
        let final_text = restore(&draft.text, &ticket.pii_map);

        let dispatcher = self.services.dispatcher.clone();
        let snapshot = ticket.clone();
        let result = run_stage(&self.policy, StageKind::Send, || {
            let dispatcher = dispatcher.clone();
            let snapshot = snapshot.clone();
            let text = final_text.clone();
            async move { dispatcher.dispatch(&snapshot, &text).await }
        })
        .await;

        match result {
            Ok(()) => {
                ticket.final_text = Some(final_text);
                ticket.record(
                    "send",
                    format!(
                        "reply dispatched via {:?}, approved_by={approved_by}, {} PII value(s) restored",
                        ticket.channel,
                        ticket.pii_map.len()
                    ),
                );
                ticket.transition(TicketStatus::Resolved, "reply delivered")?;
                self.persist(ticket).await?;
                tracing::info!(ticket = %ticket.id, "ticket resolved");
                Ok(Flow::Rest)
            }
            Err(e) => self.fail_stage(ticket, StageKind::Send, e).await,
        }
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Acquire the exclusive processing lease via conditional write.
    async fn claim(&self, id: TicketId) -> Result<Ticket, OrchestratorError> {
        let mut ticket = self.store.get(id).await?;
        if ticket.status.is_terminal() || ticket.status == TicketStatus::AwaitingReview {
            return Ok(ticket);
        }
        match &ticket.owner {
            Some(owner) if owner != &self.instance => {
                return Err(OrchestratorError::TicketBusy(id));
            }
            _ => {}
        }
        ticket.owner = Some(self.instance.clone());
        let expected = ticket.version;
        match self.store.put(ticket, expected).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::VersionConflict(_)) => Err(OrchestratorError::TicketBusy(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Conditional write of the working copy; the local ticket is replaced
    /// with the stored version so subsequent writes stay conditional.
    async fn persist(&self, ticket: &mut Ticket) -> Result<(), OrchestratorError> {
        let expected = ticket.version;
        *ticket = self.store.put(ticket.clone(), expected).await?;
        Ok(())
    }

    /// Suspend on a human reviewer: persist token + snapshot, release the
    /// lease and all compute, hand the snapshot to the reviewer surface.
    async fn suspend(
        &self,
        ticket: &mut Ticket,
        kind: ReviewKind,
        reason: &str,
    ) -> Result<Flow, OrchestratorError> {
        let token = ResumeToken::new();
        ticket.review = Some(ReviewState {
            token,
            kind,
            issued_at: Utc::now(),
        });
        ticket.transition(TicketStatus::AwaitingReview, reason)?;
        ticket.owner = None;
        self.persist(ticket).await?;

        let request = ReviewRequest {
            token,
            kind,
            ticket: ticket.clone(),
        };
        // Delivery failure leaves the ticket suspended; the timeout sweep
        // guarantees it still surfaces to an operator.
        if let Err(e) = self.services.review.deliver(&request).await {
            tracing::error!(ticket = %ticket.id, error = %e, "review delivery failed");
        }
        tracing::info!(ticket = %ticket.id, kind = ?kind, "ticket suspended for review");
        Ok(Flow::Rest)
    }

    /// Persist a status change out of `AwaitingReview`; the conditional write
    /// is the token-consumption point.
    async fn consume_token(
        &self,
        ticket: Ticket,
        token: ResumeToken,
    ) -> Result<Ticket, ReviewError> {
        let expected = ticket.version;
        match self.store.put(ticket, expected).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::VersionConflict(_)) => Err(ReviewError::TokenConsumed(token)),
            Err(e) => Err(e.into()),
        }
    }

    /// Convert an exhausted stage into its terminal failure state plus a
    /// single operator alert. A ticket is never silently dropped.
    async fn fail_stage(
        &self,
        ticket: &mut Ticket,
        stage: StageKind,
        error: StageError,
    ) -> Result<Flow, OrchestratorError> {
        let failure = stage.failure_status();
        tracing::error!(ticket = %ticket.id, stage = %stage, error = %error, "stage failed terminally");
        ticket.record(&stage.to_string(), format!("terminal failure: {error}"));
        ticket.transition(failure, "retry budget exhausted")?;
        ticket.owner = None;
        self.persist(ticket).await?;
        self.services
            .alerts
            .raise(OperatorAlert {
                ticket_id: ticket.id,
                kind: AlertKind::TerminalFailure,
                message: format!("ticket {} failed in {stage}: {error}", ticket.id),
            })
            .await;
        Ok(Flow::Rest)
    }
}

/// Whether the processing loop keeps driving or rests (suspension/terminal).
enum Flow {
    Continue,
    Rest,
}
