//! PII redaction gateway — placeholder substitution with a reversible map.
//!
//! Detector layers run in sequence, each over the *output* of the previous
//! layer, so no span is redacted twice:
//!
//! ```text
//! raw text
//!   ├─ layer 1: general detector (emails, phones, SSNs, cards, DOBs, names)
//!   ├─ layer 2: domain patterns (policy numbers, claim numbers)
//!   └─ layer 3: optional specialized entity model (plugged in by the caller)
//! ```
//!
//! Each hit becomes a `[KIND_n]` placeholder where `n` counts per kind per
//! ticket, and the original substring is recorded in the map. A layer that
//! errors is skipped and the next layer still runs; only when every layer
//! fails does `redact` return `RedactionFailure::AllLayersFailed`, which the
//! orchestrator converts into a forced human review — unredacted text never
//! proceeds silently.
//!
//! Overlap rule: a span that intersects an existing placeholder, or an
//! earlier span in the same layer, is skipped. Earlier layers win.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One redacted value: placeholder plus the original substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiEntry {
    pub placeholder: String,
    pub original: String,
}

/// Ordered, append-only placeholder → original mapping.
///
/// Placeholder keys are unique per ticket; entries are never removed or
/// rewritten (audit requirement).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMap {
    entries: Vec<PiiEntry>,
}

impl PiiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns false (and records nothing) if the
    /// placeholder key is already present.
    pub fn insert(&mut self, placeholder: String, original: String) -> bool {
        if self.entries.iter().any(|e| e.placeholder == placeholder) {
            return false;
        }
        self.entries.push(PiiEntry {
            placeholder,
            original,
        });
        true
    }

    /// Next per-kind index for a placeholder of the given kind.
    pub fn next_index(&self, kind: &str) -> usize {
        let prefix = format!("[{kind}_");
        self.entries
            .iter()
            .filter(|e| e.placeholder.starts_with(&prefix))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PiiEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any recorded original value appears in the given text.
    /// Used by the validation engine to catch PII leaking into a draft.
    pub fn leaks_into(&self, text: &str) -> Option<&PiiEntry> {
        self.entries.iter().find(|e| text.contains(&e.original))
    }
}

/// A sensitive span found by a detector, in byte offsets of the text it was
/// given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiSpan {
    pub start: usize,
    pub end: usize,
    /// Upper-snake kind label, e.g. `EMAIL`, `POLICY_NUMBER`.
    pub kind: String,
}

impl PiiSpan {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Error raised by a single detector layer.
#[derive(Debug, Clone, Error)]
#[error("detector '{detector}' failed: {message}")]
pub struct DetectorError {
    pub detector: String,
    pub message: String,
}

/// Raised only when every detector layer failed; the ticket must go to a
/// human instead of proceeding with unredacted text.
#[derive(Debug, Clone, Error)]
#[error("all {count} redaction layers failed")]
pub struct RedactionFailure {
    pub count: usize,
    pub errors: Vec<String>,
}

/// A single detector layer.
pub trait PiiDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Find sensitive spans in `text`. Spans may overlap; the engine applies
    /// the overlap rule.
    fn detect(&self, text: &str) -> Result<Vec<PiiSpan>, DetectorError>;
}

static GENERAL_PATTERNS: Lazy<Vec<(&str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "EMAIL",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
        ),
        ("SSN", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        (
            "CREDIT_CARD",
            Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").unwrap(),
        ),
        (
            "PHONE",
            Regex::new(r"\b(?:\+1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
        ),
        (
            "DATE_OF_BIRTH",
            Regex::new(r"(?i)\b(?:DOB|Date of Birth)[:\s]*\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}\b")
                .unwrap(),
        ),
        (
            "NAME",
            Regex::new(r"\b(?:Mr|Mrs|Ms|Dr)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?\b").unwrap(),
        ),
    ]
});

static DOMAIN_PATTERNS: Lazy<Vec<(&str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "POLICY_NUMBER",
            Regex::new(r"(?i)\b(?:POL|INS|PLY)[-/]?\d{6,12}\b").unwrap(),
        ),
        (
            "CLAIM_NUMBER",
            Regex::new(r"(?i)\b(?:CLM|CLAIM)[-/]?\d{6,12}\b").unwrap(),
        ),
    ]
});

/// Matches placeholders already present in the text, so later layers never
/// re-redact them.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[A-Z][A-Z0-9_]*_\d+\]").unwrap());

fn detect_with_patterns(
    text: &str,
    patterns: &[(&str, Regex)],
) -> Vec<PiiSpan> {
    let mut spans = Vec::new();
    for (kind, pattern) in patterns {
        for m in pattern.find_iter(text) {
            spans.push(PiiSpan {
                start: m.start(),
                end: m.end(),
                kind: (*kind).to_string(),
            });
        }
    }
    spans
}

/// Layer 1: general-purpose detector for common identifiers.
#[derive(Debug, Default)]
pub struct GeneralPiiDetector;

impl PiiDetector for GeneralPiiDetector {
    fn name(&self) -> &str {
        "general"
    }

    fn detect(&self, text: &str) -> Result<Vec<PiiSpan>, DetectorError> {
        Ok(detect_with_patterns(text, &GENERAL_PATTERNS))
    }
}

/// Layer 2: insurance-domain formats the general detector misses.
#[derive(Debug, Default)]
pub struct DomainPatternDetector;

impl PiiDetector for DomainPatternDetector {
    fn name(&self) -> &str {
        "domain_patterns"
    }

    fn detect(&self, text: &str) -> Result<Vec<PiiSpan>, DetectorError> {
        Ok(detect_with_patterns(text, &DOMAIN_PATTERNS))
    }
}

/// Result of a full layered redaction pass.
#[derive(Debug, Clone)]
pub struct LayeredRedaction {
    pub text: String,
    pub map: PiiMap,
    /// Names of layers that errored and were skipped.
    pub failed_layers: Vec<String>,
}

impl LayeredRedaction {
    /// Whether any layer degraded during this pass.
    pub fn degraded(&self) -> bool {
        !self.failed_layers.is_empty()
    }
}

/// The layered redaction engine.
pub struct Redactor {
    layers: Vec<Box<dyn PiiDetector>>,
}

impl Redactor {
    /// The standard two deterministic layers. A specialized entity model is
    /// applied separately by the caller via [`apply_spans`] because it lives
    /// behind an async service boundary.
    pub fn standard() -> Self {
        Self {
            layers: vec![
                Box::new(GeneralPiiDetector),
                Box::new(DomainPatternDetector),
            ],
        }
    }

    pub fn with_layers(layers: Vec<Box<dyn PiiDetector>>) -> Self {
        Self { layers }
    }

    /// Run all layers in order, degrading past individual failures.
    pub fn redact(&self, text: &str) -> Result<LayeredRedaction, RedactionFailure> {
        let mut current = text.to_string();
        let mut map = PiiMap::new();
        let mut failed_layers = Vec::new();
        let mut errors = Vec::new();

        for layer in &self.layers {
            match layer.detect(&current) {
                Ok(spans) => {
                    current = apply_spans(&current, &spans, &mut map);
                }
                Err(e) => {
                    tracing::warn!(layer = layer.name(), error = %e, "redaction layer failed, degrading to next");
                    failed_layers.push(layer.name().to_string());
                    errors.push(e.to_string());
                }
            }
        }

        if !self.layers.is_empty() && failed_layers.len() == self.layers.len() {
            return Err(RedactionFailure {
                count: self.layers.len(),
                errors,
            });
        }

        Ok(LayeredRedaction {
            text: current,
            map,
            failed_layers,
        })
    }
}

/// Substitute the given spans with placeholders, recording originals in the
/// map. Spans overlapping an existing placeholder or an earlier-kept span are
/// skipped (earlier layer wins). Replacement runs back-to-front so offsets
/// stay valid.
pub fn apply_spans(text: &str, spans: &[PiiSpan], map: &mut PiiMap) -> String {
    // Regions already substituted by an earlier layer.
    let reserved: Vec<(usize, usize)> = PLACEHOLDER
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut ordered: Vec<&PiiSpan> = spans.iter().collect();
    ordered.sort_by_key(|s| (s.start, s.end));

    let mut kept: Vec<&PiiSpan> = Vec::new();
    for span in ordered {
        if span.end > text.len() || span.start >= span.end {
            continue;
        }
        let hits_placeholder = reserved
            .iter()
            .any(|&(start, end)| span.overlaps(start, end));
        let hits_kept = kept.iter().any(|k| k.overlaps(span.start, span.end));
        if !hits_placeholder && !hits_kept {
            kept.push(span);
        }
    }

    // Assign per-kind indices in reading order, then replace from the end.
    let mut replacements: Vec<(usize, usize, String)> = Vec::with_capacity(kept.len());
    for span in &kept {
        let index = map.next_index(&span.kind);
        let placeholder = format!("[{}_{}]", span.kind, index);
        let original = text[span.start..span.end].to_string();
        map.insert(placeholder.clone(), original);
        replacements.push((span.start, span.end, placeholder));
    }

    let mut redacted = text.to_string();
    for (start, end, placeholder) in replacements.into_iter().rev() {
        redacted.replace_range(start..end, &placeholder);
    }
    redacted
}

/// Restore placeholders to their original values. Called only after approval,
/// immediately before dispatch to the customer.
pub fn restore(text: &str, map: &PiiMap) -> String {
    let mut restored = text.to_string();
    for entry in map.iter() {
        restored = restored.replace(&entry.placeholder, &entry.original);
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingDetector;

    impl PiiDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, _text: &str) -> Result<Vec<PiiSpan>, DetectorError> {
            Err(DetectorError {
                detector: "failing".to_string(),
                message: "endpoint timeout".to_string(),
            })
        }
    }

    #[test]
    fn test_round_trip_with_seeded_spans() {
        let text = "Hi, I'm Mr. John Smith, email john.smith@example.com, \
                    phone 555-123-4567. My policy is POL-12345678 and my \
                    claim CLM-87654321 was filed. SSN 123-45-6789.";
        let redactor = Redactor::standard();
        let result = redactor.redact(text).unwrap();

        // None of the seeded literals survive redaction.
        for literal in [
            "john.smith@example.com",
            "555-123-4567",
            "POL-12345678",
            "CLM-87654321",
            "123-45-6789",
            "Mr. John Smith",
        ] {
            assert!(
                !result.text.contains(literal),
                "redacted text leaked {literal:?}: {}",
                result.text
            );
        }

        // Full restoration reproduces the input exactly.
        assert_eq!(restore(&result.text, &result.map), text);
    }

    #[test]
    fn test_placeholder_counters_are_per_kind() {
        let text = "Mail a@x.com and b@y.com, call 555-123-4567.";
        let result = Redactor::standard().redact(text).unwrap();

        assert!(result.text.contains("[EMAIL_0]"));
        assert!(result.text.contains("[EMAIL_1]"));
        assert!(result.text.contains("[PHONE_0]"));
        assert!(!result.text.contains("[PHONE_1]"));
    }

    #[test]
    fn test_later_layer_never_rewrites_placeholders() {
        // The domain layer sees the general layer's output; a pattern that
        // would overlap a placeholder is skipped.
        let text = "Policy POL-12345678 for john@example.com";
        let result = Redactor::standard().redact(text).unwrap();

        assert!(result.text.contains("[EMAIL_0]"));
        assert!(result.text.contains("[POLICY_NUMBER_0]"));
        assert_eq!(result.map.len(), 2);
        assert_eq!(restore(&result.text, &result.map), text);
    }

    #[test]
    fn test_overlapping_spans_earlier_wins() {
        let mut map = PiiMap::new();
        let spans = vec![
            PiiSpan {
                start: 0,
                end: 10,
                kind: "EMAIL".to_string(),
            },
            PiiSpan {
                start: 5,
                end: 15,
                kind: "PHONE".to_string(),
            },
        ];
        let out = apply_spans("0123456789abcdefgh", &spans, &mut map);
        assert_eq!(map.len(), 1);
        assert!(out.starts_with("[EMAIL_0]"));
    }

    #[test]
    fn test_single_layer_failure_degrades() {
        let redactor = Redactor::with_layers(vec![
            Box::new(FailingDetector),
            Box::new(DomainPatternDetector),
        ]);
        let result = redactor.redact("claim CLM-123456 pending").unwrap();

        assert!(result.degraded());
        assert_eq!(result.failed_layers, vec!["failing".to_string()]);
        assert!(result.text.contains("[CLAIM_NUMBER_0]"));
    }

    #[test]
    fn test_total_failure_is_an_error() {
        let redactor = Redactor::with_layers(vec![
            Box::new(FailingDetector),
            Box::new(FailingDetector),
        ]);
        let err = redactor.redact("anything").unwrap_err();
        assert_eq!(err.count, 2);
        assert_eq!(err.errors.len(), 2);
    }

    #[test]
    fn test_no_pii_is_a_clean_pass() {
        let result = Redactor::standard()
            .redact("What does my cover include for storm damage?")
            .unwrap();
        assert!(result.map.is_empty());
        assert_eq!(
            result.text,
            "What does my cover include for storm damage?"
        );
    }

    #[test]
    fn test_map_rejects_duplicate_keys() {
        let mut map = PiiMap::new();
        assert!(map.insert("[EMAIL_0]".into(), "a@x.com".into()));
        assert!(!map.insert("[EMAIL_0]".into(), "b@y.com".into()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_leak_detection() {
        let mut map = PiiMap::new();
        map.insert("[EMAIL_0]".into(), "a@x.com".into());
        assert!(map.leaks_into("please contact a@x.com").is_some());
        assert!(map.leaks_into("please contact [EMAIL_0]").is_none());
    }

    #[test]
    fn test_dob_prefix_round_trips() {
        let text = "DOB: 12/03/1985 as on file.";
        let result = Redactor::standard().redact(text).unwrap();
        assert!(result.text.contains("[DATE_OF_BIRTH_0]"));
        assert_eq!(restore(&result.text, &result.map), text);
    }
}
