//! Versioned pipeline configuration.
//!
//! Every tunable that changes a routing decision lives here: the escalation
//! lexicon, the retrieval similarity cutoff, the auto-approve confidence
//! floor, retry budgets, and the review window. The config is passed by
//! reference into the decision policy and the retrieval gate so a decision is
//! reproducible given a config snapshot — there is no ambient global state.
//!
//! Thresholds are enforced server-side by the gate and policy; nothing a
//! prompt can say relaxes them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry budget for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before the stage is declared failed.
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds.
    pub base_delay_secs: u64,
    /// Backoff multiplier applied per retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_secs: 2,
            multiplier: 2.0,
        }
    }
}

/// Pipeline-wide configuration snapshot.
///
/// `version` identifies the snapshot in the decision trail so every recorded
/// decision names the config it was made under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Monotonically increasing config snapshot version.
    pub version: u32,

    /// Cosine-similarity cutoff below which a retrieval candidate is
    /// discarded. A business-risk parameter, not a tuning nicety.
    pub similarity_threshold: f64,

    /// Classification confidence floor for auto-approval.
    pub auto_approve_confidence: f64,

    /// Candidates requested per corpus, and the cap on assembled chunks.
    pub top_k: usize,

    /// Named corpora searched during retrieval.
    pub corpora: Vec<String>,

    /// Terms that force a ticket into human review regardless of what the
    /// classifier said.
    pub escalation_lexicon: Vec<String>,

    /// Additional financial-commitment phrasings (regex) layered on top of
    /// the built-in set.
    pub commitment_patterns: Vec<String>,

    /// Per-stage retry budget.
    pub retry: RetryConfig,

    /// Upper bound on any single collaborator call, in seconds.
    pub stage_timeout_secs: u64,

    /// Hours a ticket may sit in review before it times out.
    pub review_timeout_hours: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            similarity_threshold: 0.70,
            auto_approve_confidence: 0.90,
            top_k: 5,
            corpora: vec![
                "policy-documents".to_string(),
                "historical-tickets".to_string(),
                "compliance-rules".to_string(),
            ],
            escalation_lexicon: vec![
                "lawyer",
                "sue",
                "fraud",
                "mis-sold",
                "misselling",
                "mis-selling",
                "legal",
                "ombudsman",
                "regulator",
                "compensation",
                "negligence",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            commitment_patterns: Vec::new(),
            retry: RetryConfig::default(),
            stage_timeout_secs: 30,
            review_timeout_hours: 24,
        }
    }
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// Load a config snapshot from a TOML file. Missing keys fall back to
    /// defaults; present keys are validated.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would disable a safety gate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be in [0,1], got {}",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.auto_approve_confidence) {
            return Err(ConfigError::Invalid(format!(
                "auto_approve_confidence must be in [0,1], got {}",
                self.auto_approve_confidence
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".into()));
        }
        if self.review_timeout_hours <= 0 {
            return Err(ConfigError::Invalid(
                "review_timeout_hours must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.similarity_threshold, 0.70);
        assert_eq!(config.auto_approve_confidence, 0.90);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_secs, 2);
        assert_eq!(config.review_timeout_hours, 24);
        assert!(config.escalation_lexicon.contains(&"lawyer".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "version = 7\nsimilarity_threshold = 0.8").unwrap();

        let config = PipelineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.version, 7);
        assert_eq!(config.similarity_threshold, 0.8);
        // Untouched keys keep their defaults
        assert_eq!(config.auto_approve_confidence, 0.90);
        assert_eq!(config.corpora.len(), 3);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let config = PipelineConfig {
            similarity_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "version = [not toml").unwrap();
        assert!(matches!(
            PipelineConfig::from_toml_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
