//! Retrieval-sufficiency gate.
//!
//! The orchestrator embeds the redacted query and gathers top-K candidates
//! per corpus from the vector search service; this gate then decides whether
//! the assembled context is good enough to ground a generated reply:
//!
//! merge → rank by score → deduplicate by content fingerprint → strict
//! threshold → sufficient / insufficient.
//!
//! A wrong grounded answer is worse than an explicit deferral, so the
//! threshold is enforced unconditionally here on the server side — no prompt
//! instruction can relax it. Zero surviving candidates means the generator is
//! never called and the customer gets a deferral instead.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// A candidate chunk returned by vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub content: String,
    /// Document or ticket the chunk came from.
    pub source: String,
    /// Which named corpus produced it.
    pub corpus: String,
    /// Cosine similarity against the query embedding.
    pub score: f64,
}

/// Outcome of the retrieval gate, attached to the ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Ranked, deduplicated chunks above the threshold (empty when
    /// insufficient).
    pub chunks: Vec<ScoredChunk>,
    /// Whether generation may proceed.
    pub sufficient: bool,
    /// Best similarity seen across all candidates, kept even on an
    /// insufficient outcome for audit.
    pub max_score: f64,
    /// Total candidates inspected before filtering.
    pub searched: usize,
}

impl RetrievalOutcome {
    /// The outcome when nothing relevant was found (or embedding/search
    /// itself produced nothing). An expected result, not an error.
    pub fn insufficient(max_score: f64, searched: usize) -> Self {
        Self {
            chunks: Vec::new(),
            sufficient: false,
            max_score,
            searched,
        }
    }

    /// Format surviving chunks for prompt injection.
    pub fn formatted_context(&self) -> String {
        if self.chunks.is_empty() {
            return "[No relevant context found]".to_string();
        }
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                format!(
                    "### Context {} — {} ({})\n{}",
                    i + 1,
                    chunk.source,
                    chunk.corpus,
                    chunk.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

/// Fingerprint used for deduplication: hash of the first 200 characters, so
/// identical chunks indexed into several corpora collapse to one.
fn content_fingerprint(content: &str) -> blake3::Hash {
    let prefix: String = content.chars().take(200).collect();
    blake3::hash(prefix.as_bytes())
}

/// The strict-mode gate. Holds no state; all inputs come from the candidate
/// set and the config snapshot.
pub struct RetrievalGate<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RetrievalGate<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Evaluate merged candidates from all corpora.
    pub fn evaluate(&self, mut candidates: Vec<ScoredChunk>) -> RetrievalOutcome {
        let searched = candidates.len();
        if candidates.is_empty() {
            tracing::warn!("vector search returned no candidates");
            return RetrievalOutcome::insufficient(0.0, 0);
        }

        let max_score = candidates
            .iter()
            .map(|c| c.score)
            .fold(f64::MIN, f64::max);

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen = std::collections::HashSet::new();
        let threshold = self.config.similarity_threshold;
        let retained: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter(|c| seen.insert(content_fingerprint(&c.content)))
            .filter(|c| c.score >= threshold)
            .take(self.config.top_k)
            .collect();

        if retained.is_empty() {
            tracing::warn!(
                max_score,
                threshold,
                "best candidate below similarity threshold, deferring"
            );
            return RetrievalOutcome::insufficient(max_score, searched);
        }

        RetrievalOutcome {
            chunks: retained,
            sufficient: true,
            max_score,
            searched,
        }
    }
}
