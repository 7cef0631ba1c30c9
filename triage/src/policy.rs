//! Approval decision policy — deterministic routing for a validated ticket.
//!
//! A pure function of (classification, retrieval sufficiency, validation
//! outcome) and the config snapshot. Precedence is evaluated top-down and the
//! first match wins:
//!
//! ```text
//! 1. force_review                 → Escalate     (bypasses generation)
//! 2. validation failed            → HumanReview
//! 3. retrieval insufficient       → HumanReview
//! 4. claim / complaint intent     → HumanReview  (regardless of confidence)
//! 5. confidence below floor       → HumanReview
//! 6. otherwise                    → AutoApprove
//! ```
//!
//! Safety and sufficiency gates dominate confidence-based shortcuts; the
//! ordering is a tested invariant, not a style choice.

use serde::{Deserialize, Serialize};

use crate::classify::Classification;
use crate::config::PipelineConfig;
use crate::retrieval::RetrievalOutcome;
use crate::validation::ValidationOutcome;

/// Routing outcome for a ticket at the approval decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Send the draft without human involvement.
    AutoApprove,
    /// Hand the draft to a reviewer.
    HumanReview,
    /// Pull the ticket out of the automated flow immediately.
    Escalate,
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoApprove => write!(f, "auto_approve"),
            Self::HumanReview => write!(f, "human_review"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// A decision plus the reason recorded in the ticket's trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: ApprovalDecision,
    pub reason: String,
    /// Config snapshot the decision was made under.
    pub config_version: u32,
}

/// Evaluate the precedence ladder.
///
/// `retrieval` is `None` when escalation bypassed the retrieval stage; for
/// the rules below that reads as "not sufficient".
pub fn decide(
    classification: &Classification,
    retrieval: Option<&RetrievalOutcome>,
    validation: &ValidationOutcome,
    config: &PipelineConfig,
) -> PolicyDecision {
    let sufficient = retrieval.map(|r| r.sufficient).unwrap_or(false);

    let (decision, reason) = if classification.force_review {
        (
            ApprovalDecision::Escalate,
            format!(
                "forced review (keywords: {})",
                classification.escalation_keywords.join(", ")
            ),
        )
    } else if !validation.passed {
        (
            ApprovalDecision::HumanReview,
            format!(
                "validation failed ({} violation(s), severity {:?})",
                validation.violations.len(),
                validation.severity
            ),
        )
    } else if !sufficient {
        (
            ApprovalDecision::HumanReview,
            "insufficient retrieval context".to_string(),
        )
    } else if classification.intent.requires_review() {
        (
            ApprovalDecision::HumanReview,
            format!("{} tickets always get a human", classification.intent),
        )
    } else if classification.confidence < config.auto_approve_confidence {
        (
            ApprovalDecision::HumanReview,
            format!(
                "confidence {:.2} below floor {:.2}",
                classification.confidence, config.auto_approve_confidence
            ),
        )
    } else {
        (
            ApprovalDecision::AutoApprove,
            format!(
                "validated, grounded, confidence {:.2}",
                classification.confidence
            ),
        )
    };

    PolicyDecision {
        decision,
        reason,
        config_version: config.version,
    }
}
