//! Response validation engine — five ordered safety checks over a draft.
//!
//! ```text
//! 1. input toxicity        (original customer message)
//! 2. content safety        (draft: unsafe content + PII placeholder leaks)
//! 3. financial commitment  (draft: payout promises — always high severity)
//! 4. off-topic             (draft: medical/legal/investment/political advice)
//! 5. groundedness          (draft claims vs retrieved chunks — always high)
//! ```
//!
//! All five checks run on every draft and every report is recorded, even when
//! an earlier check already failed — the audit trail needs the complete
//! violation set, so there is no short-circuit. Any single failing check
//! blocks auto-approval.
//!
//! Check 3 exists because generic safety filters do not understand
//! domain-specific liability; it is never skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::redaction::PiiMap;
use crate::ticket::DraftReply;

/// Category of a failed safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InputToxicity,
    ContentSafety,
    FinancialCommitment,
    OffTopic,
    Ungrounded,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputToxicity => write!(f, "input_toxicity"),
            Self::ContentSafety => write!(f, "content_safety"),
            Self::FinancialCommitment => write!(f, "financial_commitment"),
            Self::OffTopic => write!(f, "off_topic"),
            Self::Ungrounded => write!(f, "ungrounded"),
        }
    }
}

/// Severity of a violation. The outcome carries the maximum across all
/// violations; `None` means the draft passed cleanly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

/// A single recorded violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub detail: String,
}

/// Result of one check. Exactly five of these appear per validation pass, in
/// check order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub check: ViolationKind,
    pub passed: bool,
    pub details: Vec<String>,
}

/// Combined outcome attached to the ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    /// All five reports in check order, failures and passes alike.
    pub checks: Vec<CheckReport>,
    pub violations: Vec<Violation>,
    pub severity: Severity,
}

impl ValidationOutcome {
    /// Kinds of the failed checks.
    pub fn violation_kinds(&self) -> Vec<ViolationKind> {
        self.violations.iter().map(|v| v.kind).collect()
    }
}

/// Verdict of the independent groundedness verification pass, produced by the
/// generation service and consumed here as check 5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundednessReport {
    pub grounded: bool,
    pub unsupported_claims: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pattern tables
// ---------------------------------------------------------------------------

/// Indicators of threats or abuse in the customer's message.
static TOXICITY_KEYWORDS: &[&str] = &[
    "kill", "murder", "attack", "threaten", "bomb", "weapon", "hate", "racist", "sexist",
];

/// Unsafe content the agent must never produce.
static CONTENT_SAFETY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:kill|hurt|harm)\s+(?:yourself|themselves|himself|herself)\b",
        r"(?i)\bhow\s+to\s+(?:make|build)\s+(?:a\s+)?(?:bomb|weapon)\b",
        r"(?i)\b(?:racial|ethnic)\s+slur",
        r"(?i)\bsexually\s+explicit\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Financial commitments the model must never make.
static COMMITMENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)you\s+will\s+receive\s+\$?\d+",
        r"(?i)your\s+claim\s+(?:is|has\s+been)\s+approved",
        r"(?i)approved\s+for\s+\$?\d+",
        r"(?i)we\s+(?:will|shall)\s+pay\s+(?:you\s+)?\$?\d+",
        r"(?i)guaranteed\s+(?:payout|payment|coverage)",
        r"(?i)I\s+(?:can\s+)?confirm\s+(?:your\s+)?(?:claim|payout)",
        r"(?i)(?:full|complete|total)\s+reimbursement\s+of",
        r"(?i)entitled\s+to\s+\$?\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Topics outside insurance support scope.
static OFF_TOPIC_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:stock|crypto|bitcoin|investment)\s+(?:advice|tips|recommendation)",
        r"(?i)(?:political|election|vote)\s+(?:opinion|view)",
        r"(?i)(?:medical|health)\s+(?:diagnosis|prescription)",
        r"(?i)legal\s+(?:advice|opinion)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// The validation engine. Construction compiles any extra commitment
/// patterns from the config snapshot on top of the built-in set.
pub struct ValidationEngine {
    extra_commitment: Vec<Regex>,
}

impl ValidationEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        let extra_commitment = config
            .commitment_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring invalid commitment pattern");
                    None
                }
            })
            .collect();
        Self { extra_commitment }
    }

    /// Run all five checks in order. Never short-circuits.
    pub fn validate(
        &self,
        customer_text: &str,
        draft: &DraftReply,
        pii_map: &PiiMap,
        groundedness: Option<&GroundednessReport>,
    ) -> ValidationOutcome {
        let checks = vec![
            self.check_input_toxicity(customer_text),
            self.check_content_safety(draft, pii_map),
            self.check_financial_commitment(draft),
            self.check_off_topic(draft),
            self.check_groundedness(draft, groundedness),
        ];

        let violations: Vec<Violation> = checks
            .iter()
            .filter(|report| !report.passed)
            .flat_map(|report| {
                let severity = severity_for(report.check);
                report.details.iter().map(move |detail| Violation {
                    kind: report.check,
                    severity,
                    detail: detail.clone(),
                })
            })
            .collect();

        let severity = violations
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(Severity::None);
        let passed = violations.is_empty();

        if !passed {
            tracing::warn!(
                severity = ?severity,
                violations = violations.len(),
                "draft failed validation"
            );
        }

        ValidationOutcome {
            passed,
            checks,
            violations,
            severity,
        }
    }

    /// Check 1: toxicity and threats in the original customer message.
    fn check_input_toxicity(&self, customer_text: &str) -> CheckReport {
        let lowered = customer_text.to_lowercase();
        let details: Vec<String> = TOXICITY_KEYWORDS
            .iter()
            .filter(|k| lowered.contains(*k))
            .map(|k| format!("toxic term in customer message: '{k}'"))
            .collect();
        CheckReport {
            check: ViolationKind::InputToxicity,
            passed: details.is_empty(),
            details,
        }
    }

    /// Check 2: unsafe content in the draft, plus the PII-leak scan — the
    /// redaction invariant enforced at the output edge.
    fn check_content_safety(&self, draft: &DraftReply, pii_map: &PiiMap) -> CheckReport {
        let mut details: Vec<String> = CONTENT_SAFETY_PATTERNS
            .iter()
            .filter_map(|p| p.find(&draft.text))
            .map(|m| format!("unsafe content: '{}'", m.as_str()))
            .collect();
        if let Some(entry) = pii_map.leaks_into(&draft.text) {
            details.push(format!(
                "draft leaks redacted value for {}",
                entry.placeholder
            ));
        }
        CheckReport {
            check: ViolationKind::ContentSafety,
            passed: details.is_empty(),
            details,
        }
    }

    /// Check 3: unauthorized financial promises.
    fn check_financial_commitment(&self, draft: &DraftReply) -> CheckReport {
        let details: Vec<String> = COMMITMENT_PATTERNS
            .iter()
            .chain(self.extra_commitment.iter())
            .flat_map(|p| p.find_iter(&draft.text))
            .map(|m| format!("payout promise: '{}'", m.as_str()))
            .collect();
        CheckReport {
            check: ViolationKind::FinancialCommitment,
            passed: details.is_empty(),
            details,
        }
    }

    /// Check 4: advice outside insurance support scope.
    fn check_off_topic(&self, draft: &DraftReply) -> CheckReport {
        let details: Vec<String> = OFF_TOPIC_PATTERNS
            .iter()
            .filter_map(|p| p.find(&draft.text))
            .map(|m| format!("off-topic content: '{}'", m.as_str()))
            .collect();
        CheckReport {
            check: ViolationKind::OffTopic,
            passed: details.is_empty(),
            details,
        }
    }

    /// Check 5: every factual claim must trace back to retrieved context.
    /// A missing verification report fails closed. Synthetic deferral drafts
    /// make no factual claims and are grounded by definition.
    fn check_groundedness(
        &self,
        draft: &DraftReply,
        groundedness: Option<&GroundednessReport>,
    ) -> CheckReport {
        let details = if draft.synthetic {
            Vec::new()
        } else {
            match groundedness {
                Some(report) if report.grounded => Vec::new(),
                Some(report) => report
                    .unsupported_claims
                    .iter()
                    .map(|c| format!("unsupported claim: '{c}'"))
                    .collect(),
                None => vec!["groundedness verification unavailable".to_string()],
            }
        };
        CheckReport {
            check: ViolationKind::Ungrounded,
            passed: details.is_empty(),
            details,
        }
    }
}

/// Severity assignment per check. Financial commitments and ungrounded
/// claims are always high.
fn severity_for(kind: ViolationKind) -> Severity {
    match kind {
        ViolationKind::FinancialCommitment | ViolationKind::Ungrounded => Severity::High,
        ViolationKind::InputToxicity
        | ViolationKind::ContentSafety
        | ViolationKind::OffTopic => Severity::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(text: &str) -> DraftReply {
        DraftReply {
            text: text.to_string(),
            confidence: 0.95,
            cited_sources: vec![],
            requires_escalation: false,
            escalation_reason: None,
            synthetic: false,
        }
    }

    fn grounded() -> GroundednessReport {
        GroundednessReport {
            grounded: true,
            unsupported_claims: vec![],
        }
    }

    fn engine() -> ValidationEngine {
        ValidationEngine::new(&PipelineConfig::default())
    }

    #[test]
    fn test_clean_draft_passes_all_five() {
        let outcome = engine().validate(
            "what is my storm damage excess?",
            &draft("Your policy covers storm damage; the excess is listed in section 4."),
            &PiiMap::new(),
            Some(&grounded()),
        );
        assert!(outcome.passed);
        assert_eq!(outcome.checks.len(), 5);
        assert!(outcome.checks.iter().all(|c| c.passed));
        assert_eq!(outcome.severity, Severity::None);
    }

    #[test]
    fn test_payout_promise_is_high_severity() {
        let outcome = engine().validate(
            "when will my claim pay out?",
            &draft("Good news — you have been approved for $5000."),
            &PiiMap::new(),
            Some(&grounded()),
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.severity, Severity::High);
        assert!(outcome
            .violation_kinds()
            .contains(&ViolationKind::FinancialCommitment));
    }

    #[test]
    fn test_all_checks_recorded_even_when_first_fails() {
        // Toxic input AND a payout promise AND off-topic advice: every
        // failure is recorded, not just the first.
        let outcome = engine().validate(
            "I will attack your office",
            &draft("You are entitled to $9999. Also, here is some legal advice."),
            &PiiMap::new(),
            None,
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.checks.len(), 5);
        let kinds = outcome.violation_kinds();
        assert!(kinds.contains(&ViolationKind::InputToxicity));
        assert!(kinds.contains(&ViolationKind::FinancialCommitment));
        assert!(kinds.contains(&ViolationKind::OffTopic));
        assert!(kinds.contains(&ViolationKind::Ungrounded));
    }

    #[test]
    fn test_pii_leak_in_draft_fails_content_safety() {
        let mut map = PiiMap::new();
        map.insert("[EMAIL_0]".into(), "jane@example.com".into());
        let outcome = engine().validate(
            "update my email",
            &draft("We have updated the address jane@example.com on file."),
            &map,
            Some(&grounded()),
        );
        assert!(!outcome.passed);
        assert!(outcome
            .violation_kinds()
            .contains(&ViolationKind::ContentSafety));
    }

    #[test]
    fn test_placeholders_in_draft_are_fine() {
        let mut map = PiiMap::new();
        map.insert("[EMAIL_0]".into(), "jane@example.com".into());
        let outcome = engine().validate(
            "update my email",
            &draft("We have updated the address [EMAIL_0] on file."),
            &map,
            Some(&grounded()),
        );
        assert!(outcome.passed);
    }

    #[test]
    fn test_missing_groundedness_report_fails_closed() {
        let outcome = engine().validate(
            "what is covered?",
            &draft("Everything is covered up to any amount."),
            &PiiMap::new(),
            None,
        );
        assert!(!outcome.passed);
        assert!(outcome.violation_kinds().contains(&ViolationKind::Ungrounded));
        assert_eq!(outcome.severity, Severity::High);
    }

    #[test]
    fn test_unsupported_claims_reported() {
        let report = GroundednessReport {
            grounded: false,
            unsupported_claims: vec!["excess is $0".to_string()],
        };
        let outcome = engine().validate(
            "what is my excess?",
            &draft("Your excess is $0."),
            &PiiMap::new(),
            Some(&report),
        );
        assert!(!outcome.passed);
        let ungrounded = outcome
            .checks
            .iter()
            .find(|c| c.check == ViolationKind::Ungrounded)
            .unwrap();
        assert!(ungrounded.details[0].contains("excess is $0"));
    }

    #[test]
    fn test_synthetic_deferral_is_grounded_by_definition() {
        let mut deferral = draft(
            "Let me connect you with a specialist who can help with this question.",
        );
        deferral.synthetic = true;
        let outcome =
            engine().validate("anything", &deferral, &PiiMap::new(), None);
        assert!(outcome.passed);
    }

    #[test]
    fn test_config_commitment_patterns_extend_builtin() {
        let config = PipelineConfig {
            commitment_patterns: vec![r"(?i)cheque\s+is\s+in\s+the\s+post".to_string()],
            ..Default::default()
        };
        let engine = ValidationEngine::new(&config);
        let outcome = engine.validate(
            "where is my money?",
            &draft("Your cheque is in the post."),
            &PiiMap::new(),
            Some(&grounded()),
        );
        assert!(!outcome.passed);
        assert!(outcome
            .violation_kinds()
            .contains(&ViolationKind::FinancialCommitment));
    }

    #[test]
    fn test_invalid_config_pattern_is_ignored() {
        let config = PipelineConfig {
            commitment_patterns: vec!["([unclosed".to_string()],
            ..Default::default()
        };
        let engine = ValidationEngine::new(&config);
        let outcome = engine.validate(
            "hello",
            &draft("A plain reply."),
            &PiiMap::new(),
            Some(&grounded()),
        );
        assert!(outcome.passed);
    }
}
