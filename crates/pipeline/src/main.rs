use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use ticket_pipeline::{
    AlertSink, AttachmentProcessor, DraftGenerator, GeneratedDraft, HttpInferenceClient,
    HttpInferenceConfig, IntentClassifier, MemoryTicketStore, OperatorAlert, Orchestrator,
    QueryEmbedder, ResponseDispatcher, ReviewChannel, ReviewRequest, Services, VectorSearch,
};
use triage::retrieval::{RetrievalOutcome, ScoredChunk};
use triage::validation::GroundednessReport;
use triage::{
    Channel, ClassifierVerdict, IntentKind, PipelineConfig, StageError, Ticket,
    TicketCreationEvent,
};

/// Demo runner: drives sample tickets through the pipeline against canned
/// collaborators (or a real inference endpoint when one is configured).
#[derive(Parser, Debug)]
#[command(name = "ticket-pipeline", about = "Insurance support ticket orchestrator demo")]
struct Args {
    /// Path to a pipeline config TOML; defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Base URL of a JSON inference endpoint for generation/embedding.
    /// Without it, canned demo services are used.
    #[arg(long)]
    endpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// Canned demo collaborators
// ---------------------------------------------------------------------------

struct NoAttachments;

#[async_trait]
impl AttachmentProcessor for NoAttachments {
    async fn extract_text(&self, _refs: &[String]) -> Result<String, StageError> {
        Ok(String::new())
    }
}

struct CannedClassifier;

#[async_trait]
impl IntentClassifier for CannedClassifier {
    async fn classify(&self, redacted_text: &str) -> Result<ClassifierVerdict, StageError> {
        let lowered = redacted_text.to_lowercase();
        let (intent, confidence) = if lowered.contains("claim") {
            (IntentKind::ClaimIssue, 0.93)
        } else if lowered.contains("change") {
            (IntentKind::PolicyChange, 0.91)
        } else {
            (IntentKind::GeneralInquiry, 0.95)
        };
        Ok(ClassifierVerdict {
            intent,
            confidence,
            reasoning: "canned demo classifier".to_string(),
        })
    }
}

struct CannedEmbedder;

#[async_trait]
impl QueryEmbedder for CannedEmbedder {
    async fn embed(&self, _redacted_text: &str) -> Result<Vec<f32>, StageError> {
        Ok(vec![0.1; 8])
    }
}

struct CannedSearch;

#[async_trait]
impl VectorSearch for CannedSearch {
    async fn search(
        &self,
        corpus: &str,
        _embedding: &[f32],
        _top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StageError> {
        if corpus != "policy-documents" {
            return Ok(vec![]);
        }
        Ok(vec![ScoredChunk {
            content: "Storm damage to the insured property is covered; the \
                      standard excess of $250 applies per event."
                .to_string(),
            source: "home-policy.pdf#storm".to_string(),
            corpus: corpus.to_string(),
            score: 0.88,
        }])
    }
}

struct CannedGenerator;

#[async_trait]
impl DraftGenerator for CannedGenerator {
    async fn generate(
        &self,
        _redacted_query: &str,
        context: &RetrievalOutcome,
    ) -> Result<GeneratedDraft, StageError> {
        let cited = context.chunks.iter().map(|c| c.source.clone()).collect();
        Ok(GeneratedDraft {
            text: "Thank you for getting in touch. Storm damage to your \
                   insured property is covered under your policy, with the \
                   standard excess applying per event. Please see the policy \
                   schedule for the exact amount."
                .to_string(),
            confidence: 0.94,
            cited_sources: cited,
            requires_escalation: false,
            escalation_reason: None,
        })
    }

    async fn verify_groundedness(
        &self,
        _draft_text: &str,
        _chunks: &[ScoredChunk],
    ) -> Result<GroundednessReport, StageError> {
        Ok(GroundednessReport {
            grounded: true,
            unsupported_claims: vec![],
        })
    }
}

struct ConsoleReviewChannel;

#[async_trait]
impl ReviewChannel for ConsoleReviewChannel {
    async fn deliver(&self, request: &ReviewRequest) -> Result<(), StageError> {
        info!(
            ticket = %request.ticket.id,
            kind = ?request.kind,
            token = %request.token,
            "review request delivered (resume with `resume_review`)"
        );
        Ok(())
    }
}

struct ConsoleDispatcher;

#[async_trait]
impl ResponseDispatcher for ConsoleDispatcher {
    async fn dispatch(&self, ticket: &Ticket, final_text: &str) -> Result<(), StageError> {
        info!(ticket = %ticket.id, channel = ?ticket.channel, "dispatching reply");
        println!("--- reply to {} ---\n{}\n", ticket.customer_ref, final_text);
        Ok(())
    }
}

struct ConsoleAlerts;

#[async_trait]
impl AlertSink for ConsoleAlerts {
    async fn raise(&self, alert: OperatorAlert) {
        tracing::error!(ticket = %alert.ticket_id, kind = ?alert.kind, "{}", alert.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    info!(
        config_version = config.version,
        similarity_threshold = config.similarity_threshold,
        "pipeline starting"
    );

    let (generator, embedder): (Arc<dyn DraftGenerator>, Arc<dyn QueryEmbedder>) =
        match &args.endpoint {
            Some(url) => {
                let client = Arc::new(HttpInferenceClient::new(HttpInferenceConfig {
                    base_url: url.clone(),
                    ..Default::default()
                }));
                info!(endpoint = %url, "using HTTP inference endpoint");
                (client.clone(), client)
            }
            None => (Arc::new(CannedGenerator), Arc::new(CannedEmbedder)),
        };

    let services = Services {
        attachments: Arc::new(NoAttachments),
        classifier: Arc::new(CannedClassifier),
        embedder,
        search: Arc::new(CannedSearch),
        generator,
        entities: None,
        review: Arc::new(ConsoleReviewChannel),
        dispatcher: Arc::new(ConsoleDispatcher),
        alerts: Arc::new(ConsoleAlerts),
    };
    let store = Arc::new(MemoryTicketStore::new());
    let orchestrator = Orchestrator::new(config, services, store);

    // A clean inquiry: auto-approved end to end.
    let auto_id = orchestrator
        .submit(TicketCreationEvent {
            channel: Channel::Email,
            customer_ref: "customer-1001".to_string(),
            text: "Hi, my email is jane.doe@example.com. Is storm damage \
                   covered on policy POL-55512345?"
                .to_string(),
            attachment_refs: vec![],
        })
        .await?;
    let snapshot = orchestrator.status(auto_id).await?;
    info!(status = %snapshot.status, "ticket 1 rested");

    // An escalation-keyword ticket: suspended before any model call.
    let hitl_id = orchestrator
        .submit(TicketCreationEvent {
            channel: Channel::Chat,
            customer_ref: "customer-1002".to_string(),
            text: "This policy was mis-sold to me and I am contacting my \
                   lawyer about claim CLM-99887766."
                .to_string(),
            attachment_refs: vec![],
        })
        .await?;
    let snapshot = orchestrator.status(hitl_id).await?;
    info!(status = %snapshot.status, "ticket 2 rested");

    // One sweep pass; nothing has been waiting 24h in this demo.
    let timed_out = orchestrator.check_review_timeouts().await?;
    info!(timed_out, "review timeout sweep complete");

    Ok(())
}
