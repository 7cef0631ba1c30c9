//! Intent classification model and the core-side escalation override.
//!
//! The external classifier returns a raw verdict (intent + confidence). The
//! core then applies the one rule the model is never trusted with: the
//! escalation lexicon. Any configured term present in the redacted text sets
//! `force_review` and overrides the intent to the most restrictive complaint
//! category — the ticket then bypasses retrieval and generation entirely.
//!
//! Claim/complaint intents and low-confidence verdicts do NOT set
//! `force_review`; they still flow through generation so the reviewer gets a
//! draft, and the approval policy routes them to human review at the end.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// Supported intent categories for insurance support queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    GeneralInquiry,
    PolicyChange,
    ComplaintMisselling,
    ClaimIssue,
}

/// Handling priority derived from intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl IntentKind {
    /// Claim and complaint intents are never auto-answered.
    pub fn requires_review(self) -> bool {
        matches!(self, Self::ComplaintMisselling | Self::ClaimIssue)
    }

    pub fn priority(self) -> Priority {
        match self {
            Self::GeneralInquiry => Priority::Low,
            Self::PolicyChange => Priority::Medium,
            Self::ComplaintMisselling | Self::ClaimIssue => Priority::High,
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GeneralInquiry => write!(f, "general_inquiry"),
            Self::PolicyChange => write!(f, "policy_change"),
            Self::ComplaintMisselling => write!(f, "complaint_misselling"),
            Self::ClaimIssue => write!(f, "claim_issue"),
        }
    }
}

/// Raw output of the external classification service, before the core's
/// override rules run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub intent: IntentKind,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
}

impl ClassifierVerdict {
    /// Fallback verdict for an empty message: general inquiry at zero
    /// confidence, which the review floor then routes to a human.
    pub fn empty_message() -> Self {
        Self {
            intent: IntentKind::GeneralInquiry,
            confidence: 0.0,
            reasoning: "empty message, defaulting to general inquiry".to_string(),
        }
    }
}

/// Final classification attached to the ticket. Set once; re-classification
/// mid-flight is not supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentKind,
    pub confidence: f64,
    pub reasoning: String,
    /// Escalation lexicon terms found in the redacted text.
    pub escalation_keywords: Vec<String>,
    /// When true the ticket bypasses retrieval and generation entirely.
    pub force_review: bool,
}

/// Apply the core's escalation rules on top of a classifier verdict.
pub fn apply_escalation_rules(
    redacted_text: &str,
    verdict: ClassifierVerdict,
    config: &PipelineConfig,
) -> Classification {
    let lowered = redacted_text.to_lowercase();
    let escalation_keywords: Vec<String> = config
        .escalation_lexicon
        .iter()
        .filter(|keyword| lowered.contains(&keyword.to_lowercase()))
        .cloned()
        .collect();

    let mut intent = verdict.intent;
    let mut reasoning = verdict.reasoning;

    if !escalation_keywords.is_empty() {
        tracing::warn!(
            keywords = ?escalation_keywords,
            "escalation keywords detected"
        );
        if !intent.requires_review() {
            intent = IntentKind::ComplaintMisselling;
            reasoning.push_str(&format!(
                " [escalated: keywords detected — {}]",
                escalation_keywords.join(", ")
            ));
        }
    }

    let confidence = verdict.confidence.clamp(0.0, 1.0);
    let force_review = !escalation_keywords.is_empty();

    Classification {
        intent,
        confidence,
        reasoning,
        escalation_keywords,
        force_review,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(intent: IntentKind, confidence: f64) -> ClassifierVerdict {
        ClassifierVerdict {
            intent,
            confidence,
            reasoning: "test".to_string(),
        }
    }

    #[test]
    fn test_lawyer_forces_review_and_overrides_intent() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "I will contact my lawyer about this policy",
            verdict(IntentKind::GeneralInquiry, 0.97),
            &config,
        );
        assert!(c.force_review);
        assert_eq!(c.intent, IntentKind::ComplaintMisselling);
        assert_eq!(c.escalation_keywords, vec!["lawyer".to_string()]);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "This is FRAUD and I want answers",
            verdict(IntentKind::GeneralInquiry, 0.95),
            &config,
        );
        assert!(c.force_review);
        assert!(c.escalation_keywords.contains(&"fraud".to_string()));
    }

    #[test]
    fn test_claim_intent_keeps_its_category_on_escalation() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "my claim was denied, I want compensation",
            verdict(IntentKind::ClaimIssue, 0.9),
            &config,
        );
        // Already the restrictive category — no override, still forced.
        assert_eq!(c.intent, IntentKind::ClaimIssue);
        assert!(c.force_review);
        assert!(c.escalation_keywords.contains(&"compensation".to_string()));
    }

    #[test]
    fn test_high_confidence_general_inquiry_is_not_forced() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "what does storm damage cover include?",
            verdict(IntentKind::GeneralInquiry, 0.95),
            &config,
        );
        assert!(!c.force_review);
        assert!(c.escalation_keywords.is_empty());
    }

    #[test]
    fn test_low_confidence_alone_does_not_force() {
        // Low confidence routes to human review at the approval decision,
        // with a draft in hand — it does not bypass generation.
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "what does storm damage cover include?",
            verdict(IntentKind::GeneralInquiry, 0.5),
            &config,
        );
        assert!(!c.force_review);
        assert_eq!(c.intent, IntentKind::GeneralInquiry);
    }

    #[test]
    fn test_complaint_intent_alone_does_not_force() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "neutral wording with no trigger terms",
            verdict(IntentKind::ComplaintMisselling, 0.99),
            &config,
        );
        assert!(!c.force_review);
        assert!(c.intent.requires_review());
    }

    #[test]
    fn test_empty_message_verdict() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules("", ClassifierVerdict::empty_message(), &config);
        assert!(!c.force_review);
        assert_eq!(c.intent, IntentKind::GeneralInquiry);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let config = PipelineConfig::default();
        let c = apply_escalation_rules(
            "hello",
            verdict(IntentKind::GeneralInquiry, 1.7),
            &config,
        );
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_priority_metadata() {
        assert_eq!(IntentKind::GeneralInquiry.priority(), Priority::Low);
        assert_eq!(IntentKind::PolicyChange.priority(), Priority::Medium);
        assert_eq!(IntentKind::ClaimIssue.priority(), Priority::High);
        assert!(!IntentKind::PolicyChange.requires_review());
    }
}
