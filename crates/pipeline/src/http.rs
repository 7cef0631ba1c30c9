//! HTTP inference client — a JSON-over-HTTP implementation of the generation
//! and embedding contracts.
//!
//! Targets any endpoint speaking the simple contract below (a thin shim in
//! front of a hosted model works):
//!
//! ```text
//! POST {base}/generate   {"system", "prompt"}        -> {"text", "confidence", "cited_sources", "requires_escalation"}
//! POST {base}/verify     {"draft", "chunks": [...]}   -> {"grounded", "unsupported_claims"}
//! POST {base}/embed      {"text"}                     -> {"embedding": [...]}
//! ```
//!
//! Connection and HTTP-5xx failures map to transient stage errors (the retry
//! layer handles them); 4xx responses are permanent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use triage::retrieval::{RetrievalOutcome, ScoredChunk};
use triage::validation::GroundednessReport;
use triage::{StageError, StageKind};

use crate::services::{DraftGenerator, GeneratedDraft, QueryEmbedder};

const SYSTEM_PROMPT: &str = "You are a careful insurance support assistant. \
    Answer ONLY from the provided context. If the context does not cover the \
    question, say so and defer to a specialist instead of guessing. Never \
    promise payouts, claim approvals, or specific amounts. Preserve \
    bracketed placeholders like [EMAIL_0] exactly as written.";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct HttpInferenceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for HttpInferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON inference client implementing [`DraftGenerator`] and
/// [`QueryEmbedder`].
pub struct HttpInferenceClient {
    config: HttpInferenceConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    system: &'a str,
    prompt: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    cited_sources: Vec<String>,
    #[serde(default)]
    requires_escalation: bool,
    #[serde(default)]
    escalation_reason: Option<String>,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    draft: &'a str,
    chunks: Vec<&'a str>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    grounded: bool,
    #[serde(default)]
    unsupported_claims: Vec<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpInferenceClient {
    pub fn new(config: HttpInferenceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        stage: StageKind,
        path: &str,
        body: &Req,
    ) -> Result<Resp, StageError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| StageError::transient(stage, format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StageError::transient(
                stage,
                format!("{path} returned {status}"),
            ));
        }
        if !status.is_success() {
            return Err(StageError::permanent(
                stage,
                format!("{path} returned {status}"),
            ));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| StageError::permanent(stage, format!("invalid {path} payload: {e}")))
    }

    fn generation_prompt(redacted_query: &str, context: &RetrievalOutcome) -> String {
        format!(
            "## Knowledge base context\n{}\n\n## Customer query\n{}\n\n\
             Reply to the customer using only the context above. Cite the \
             sources you used.",
            context.formatted_context(),
            redacted_query
        )
    }
}

#[async_trait]
impl DraftGenerator for HttpInferenceClient {
    async fn generate(
        &self,
        redacted_query: &str,
        context: &RetrievalOutcome,
    ) -> Result<GeneratedDraft, StageError> {
        let request = GenerateRequest {
            system: SYSTEM_PROMPT,
            prompt: Self::generation_prompt(redacted_query, context),
        };
        let response: GenerateResponse = self
            .post_json(StageKind::Generation, "generate", &request)
            .await?;
        Ok(GeneratedDraft {
            text: response.text,
            confidence: response.confidence.clamp(0.0, 1.0),
            cited_sources: response.cited_sources,
            requires_escalation: response.requires_escalation,
            escalation_reason: response.escalation_reason,
        })
    }

    async fn verify_groundedness(
        &self,
        draft_text: &str,
        chunks: &[ScoredChunk],
    ) -> Result<GroundednessReport, StageError> {
        let request = VerifyRequest {
            draft: draft_text,
            chunks: chunks.iter().map(|c| c.content.as_str()).collect(),
        };
        let response: VerifyResponse = self
            .post_json(StageKind::Validation, "verify", &request)
            .await?;
        Ok(GroundednessReport {
            grounded: response.grounded,
            unsupported_claims: response.unsupported_claims,
        })
    }
}

#[async_trait]
impl QueryEmbedder for HttpInferenceClient {
    async fn embed(&self, redacted_text: &str) -> Result<Vec<f32>, StageError> {
        let request = EmbedRequest {
            text: redacted_text,
        };
        let response: EmbedResponse = self
            .post_json(StageKind::Retrieval, "embed", &request)
            .await?;
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_context_and_query() {
        let outcome = RetrievalOutcome {
            chunks: vec![ScoredChunk {
                content: "Storm damage excess is $250.".to_string(),
                source: "home-policy.pdf".to_string(),
                corpus: "policy-documents".to_string(),
                score: 0.9,
            }],
            sufficient: true,
            max_score: 0.9,
            searched: 1,
        };
        let prompt = HttpInferenceClient::generation_prompt("What is my excess?", &outcome);
        assert!(prompt.contains("Storm damage excess is $250."));
        assert!(prompt.contains("What is my excess?"));
        assert!(prompt.contains("home-policy.pdf"));
    }

    #[test]
    fn test_system_prompt_refuses_commitments() {
        assert!(SYSTEM_PROMPT.contains("Never"));
        assert!(SYSTEM_PROMPT.contains("defer to a specialist"));
    }
}
