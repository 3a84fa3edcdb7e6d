//! Proposals: each agent's candidate conclusion for a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Text recorded for a substituted fallback proposal.
pub const FALLBACK_TEXT: &str = "analysis unavailable";

/// A single piece of supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// What is being asserted.
    pub fact: String,
    /// Observed value backing the fact.
    pub value: String,
    /// Confidence in this piece of evidence (0.0–1.0).
    pub confidence: f64,
}

impl Evidence {
    pub fn new(fact: &str, value: &str, confidence: f64) -> Self {
        Self {
            fact: fact.to_string(),
            value: value.to_string(),
            confidence: clamp_unit(confidence),
        }
    }
}

/// Raw output of an analysis provider, before it becomes a [`Proposal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Proposed conclusion.
    pub text: String,
    /// Facts backing the conclusion; may be empty.
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Self-reported; clamped to [0, 1] when it becomes a proposal.
    pub confidence: f64,
}

impl Analysis {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            text: text.to_string(),
            evidence: Vec::new(),
            confidence,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }
}

/// An agent's proposal. Never mutated once created; resolution produces a
/// separate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub agent_id: AgentId,
    pub text: String,
    pub evidence: Vec<Evidence>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    /// Placeholder substituted for a failed or cancelled provider call.
    pub fallback: bool,
}

impl Proposal {
    /// Build a proposal from provider output, clamping confidences into [0, 1].
    pub fn from_analysis(agent_id: &str, analysis: Analysis) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            text: analysis.text,
            evidence: analysis
                .evidence
                .into_iter()
                .map(|mut e| {
                    e.confidence = clamp_unit(e.confidence);
                    e
                })
                .collect(),
            confidence: clamp_unit(analysis.confidence),
            created_at: Utc::now(),
            fallback: false,
        }
    }

    /// Zero-confidence placeholder for an agent whose analysis is unavailable.
    pub fn fallback(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            text: FALLBACK_TEXT.to_string(),
            evidence: Vec::new(),
            confidence: 0.0,
            created_at: Utc::now(),
            fallback: true,
        }
    }

    /// Override the creation timestamp (used for deterministic replays).
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Short single-line form for log summaries.
    pub fn summary(&self) -> String {
        if self.fallback {
            return format!("fallback: {}", FALLBACK_TEXT);
        }
        format!(
            "\"{}\" (confidence {:.2}, {} evidence)",
            truncate(&self.text, 80),
            self.confidence,
            self.evidence.len()
        )
    }
}

/// Clamp into [0, 1]; NaN maps to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_analysis_clamps_confidence() {
        let analysis = Analysis::new("notify lender", 1.4).with_evidence(Evidence {
            fact: "dscr".to_string(),
            value: "0.9".to_string(),
            confidence: -0.5,
        });
        let proposal = Proposal::from_analysis("finance", analysis);
        assert_eq!(proposal.confidence, 1.0);
        assert_eq!(proposal.evidence[0].confidence, 0.0);
        assert!(!proposal.fallback);
    }

    #[test]
    fn test_fallback_shape() {
        let proposal = Proposal::fallback("risk");
        assert_eq!(proposal.text, FALLBACK_TEXT);
        assert_eq!(proposal.confidence, 0.0);
        assert!(proposal.evidence.is_empty());
        assert!(proposal.fallback);
        assert!(proposal.summary().starts_with("fallback"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé…");
    }
}
