//! Similarity classification: vote grouping and contradiction detection.
//!
//! The protocol only talks to [`SimilarityClassifier`]. The bundled
//! [`OverlapClassifier`] scores normalized word-set overlap (Jaccard) against
//! a configurable threshold and flags contradictions from a table of opposing
//! stance phrases. Embedding- or rule-engine-backed classifiers plug in behind
//! the same trait.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::provider::CollaboratorError;

/// Default overlap score at which two proposals count as the same decision.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Decides whether two proposal texts are the same decision, or mutually
/// exclusive ones.
///
/// Implementations must be pure and deterministic for a given pair of inputs;
/// `are_similar` must be symmetric. An `Err` is treated by the protocol as an
/// inconclusive answer (not similar, not contradictory).
pub trait SimilarityClassifier: Send + Sync {
    fn are_similar(&self, a: &str, b: &str) -> Result<bool, CollaboratorError>;

    fn are_contradictory(&self, a: &str, b: &str) -> Result<bool, CollaboratorError>;

    /// Checked once before a run starts; an `Err` aborts the run.
    fn validate(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// A pair of phrases that assert mutually exclusive outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpposingStance {
    pub one: String,
    pub other: String,
}

impl OpposingStance {
    pub fn new(one: &str, other: &str) -> Self {
        Self {
            one: one.to_string(),
            other: other.to_string(),
        }
    }
}

/// Word-overlap classifier with an opposing-stance table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlapClassifier {
    /// Jaccard score in [0, 1] at or above which texts are similar.
    pub threshold: f64,
    /// Phrase pairs treated as contradictory.
    pub stances: Vec<OpposingStance>,
}

impl Default for OverlapClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl OverlapClassifier {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            stances: vec![
                OpposingStance::new("act immediately", "no action needed"),
                OpposingStance::new("high risk", "low risk"),
                OpposingStance::new("approve", "reject"),
                OpposingStance::new("increase", "decrease"),
                OpposingStance::new("buy", "sell"),
                OpposingStance::new("escalate", "monitor only"),
            ],
        }
    }

    /// Replace the stance table.
    pub fn with_stances(mut self, stances: Vec<OpposingStance>) -> Self {
        self.stances = stances;
        self
    }

    /// Normalized overlap score in [0, 1].
    ///
    /// Two empty texts score 1.0; one empty text scores 0.0.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let left: HashSet<String> = tokens(a).into_iter().collect();
        let right: HashSet<String> = tokens(b).into_iter().collect();

        if left.is_empty() && right.is_empty() {
            return 1.0;
        }
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }

        let intersection = left.intersection(&right).count();
        let union = left.union(&right).count();
        intersection as f64 / union as f64
    }

    fn holds(&self, text: &[String], phrase: &str) -> bool {
        let phrase = tokens(phrase);
        !phrase.is_empty() && text.windows(phrase.len()).any(|w| w == phrase.as_slice())
    }
}

impl SimilarityClassifier for OverlapClassifier {
    fn are_similar(&self, a: &str, b: &str) -> Result<bool, CollaboratorError> {
        self.validate()?;
        Ok(self.score(a, b) >= self.threshold)
    }

    fn validate(&self) -> Result<(), CollaboratorError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CollaboratorError::Misconfigured(format!(
                "similarity threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }

    fn are_contradictory(&self, a: &str, b: &str) -> Result<bool, CollaboratorError> {
        let a = tokens(a);
        let b = tokens(b);

        let contradicts = self.stances.iter().any(|stance| {
            let a_one = self.holds(&a, &stance.one);
            let a_other = self.holds(&a, &stance.other);
            let b_one = self.holds(&b, &stance.one);
            let b_other = self.holds(&b, &stance.other);

            // A text holding both sides of a stance asserts neither.
            (a_one && !a_other && b_other && !b_one) || (a_other && !a_one && b_one && !b_other)
        });
        Ok(contradicts)
    }
}

/// Lowercased alphanumeric word tokens, in order.
fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_are_similar() {
        let c = OverlapClassifier::default();
        assert!(c.are_similar("Notify lender", "notify lender.").unwrap());
        assert_eq!(c.score("", ""), 1.0);
        assert_eq!(c.score("notify", ""), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric_and_thresholded() {
        let c = OverlapClassifier::new(0.5);
        let a = "notify lender about covenant breach";
        let b = "notify lender about breach";
        assert_eq!(c.score(a, b), c.score(b, a));
        assert!(c.are_similar(a, b).unwrap());
        assert!(!c.are_similar(a, "renegotiate the lease").unwrap());
    }

    #[test]
    fn test_bad_threshold_is_an_error() {
        let c = OverlapClassifier::new(1.5);
        assert!(c.are_similar("a", "a").is_err());
        assert!(matches!(
            c.validate(),
            Err(CollaboratorError::Misconfigured(_))
        ));
        assert!(OverlapClassifier::default().validate().is_ok());
    }

    #[test]
    fn test_opposing_stances_contradict() {
        let c = OverlapClassifier::default();
        assert!(c
            .are_contradictory("Tenant is high risk", "tenant looks low risk")
            .unwrap());
        assert!(c
            .are_contradictory("No action needed here", "We must act immediately")
            .unwrap());
        assert!(!c
            .are_contradictory("high risk tenant", "high risk tenant")
            .unwrap());
    }

    #[test]
    fn test_stance_matching_uses_word_boundaries() {
        let c = OverlapClassifier::default();
        assert!(!c.are_contradictory("disapprove", "reject").unwrap());
    }

    #[test]
    fn test_text_holding_both_sides_is_not_contradictory() {
        let c = OverlapClassifier::default();
        assert!(!c
            .are_contradictory("either approve or reject later", "reject")
            .unwrap());
    }
}
