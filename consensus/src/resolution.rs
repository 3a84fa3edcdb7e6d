//! Resolution: applies received challenges to each proposal's validity and
//! confidence. Pure and deterministic: no I/O, no concurrency.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::AgentId;
use crate::challenge::{Challenge, ChallengeKind, ValidationMap, ValidationVerdict};
use crate::log::{DebateLog, DebateStage};
use crate::proposal::{clamp_unit, Proposal};

/// Confidence multiplier when two or more peers report a contradiction.
pub const CONTRADICTION_PENALTY: f64 = 0.5;
/// Confidence multiplier for a proposal that failed validation and was
/// challenged on methodology.
pub const METHODOLOGY_PENALTY: f64 = 0.7;
/// Erosion per challenge received by a proposal that stays valid.
pub const EROSION_PER_CHALLENGE: f64 = 0.1;
/// Erosion never takes a valid proposal below this fraction of its confidence.
pub const EROSION_FLOOR: f64 = 0.5;

/// Resolved validity and confidence of one agent's proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub agent_id: AgentId,
    pub is_valid: bool,
    /// Confidence after challenges, in [0, 1].
    pub adjusted_confidence: f64,
    pub challenges_received: usize,
    /// Why the verdict was reached; "unchallenged" when nothing was raised.
    pub rationale: String,
}

impl Resolution {
    pub fn summary(&self) -> String {
        format!(
            "{} (confidence {:.2}, {} challenge(s)): {}",
            if self.is_valid { "valid" } else { "invalid" },
            self.adjusted_confidence,
            self.challenges_received,
            self.rationale
        )
    }
}

/// Resolutions keyed by agent id.
pub type ResolutionMap = HashMap<AgentId, Resolution>;

/// Applies challenge outcomes to proposals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionEngine;

impl ResolutionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every proposal and log each resolution in proposal order.
    pub fn resolve(
        &self,
        proposals: &[Proposal],
        challenges: &[Challenge],
        validation: &ValidationMap,
        log: &DebateLog,
    ) -> ResolutionMap {
        let mut inbound: HashMap<&str, Vec<&Challenge>> = HashMap::new();
        for challenge in challenges {
            inbound
                .entry(challenge.target_id.as_str())
                .or_default()
                .push(challenge);
        }

        let mut resolutions = ResolutionMap::with_capacity(proposals.len());
        for proposal in proposals {
            let received = inbound
                .get(proposal.agent_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let verdict = validation
                .get(&proposal.agent_id)
                .copied()
                .unwrap_or(ValidationVerdict::Inconclusive);

            let resolution = resolve_one(proposal, received, verdict);
            debug!(
                agent_id = %resolution.agent_id,
                valid = resolution.is_valid,
                confidence = resolution.adjusted_confidence,
                "resolved"
            );
            log.append(
                DebateStage::Resolution,
                Some(&resolution.agent_id),
                resolution.summary(),
            );
            resolutions.insert(proposal.agent_id.clone(), resolution);
        }

        info!(
            task_id = %log.task_id(),
            invalidated = resolutions.values().filter(|r| !r.is_valid).count(),
            total = resolutions.len(),
            "resolution phase complete"
        );
        resolutions
    }
}

/// Apply the resolution rules to a single proposal.
pub fn resolve_one(
    proposal: &Proposal,
    received: &[&Challenge],
    verdict: ValidationVerdict,
) -> Resolution {
    let count = |kind: ChallengeKind| received.iter().filter(|c| c.kind == kind).count();
    let contradictions = count(ChallengeKind::Contradiction);
    let methodology = count(ChallengeKind::Methodology);

    let (is_valid, factor, rationale) = if received.is_empty() {
        (true, 1.0, "unchallenged".to_string())
    } else if contradictions >= 2 {
        (
            false,
            CONTRADICTION_PENALTY,
            format!(
                "invalidated — {} independent contradictions",
                contradictions
            ),
        )
    } else if methodology > 0 && verdict == ValidationVerdict::Failed {
        (
            false,
            METHODOLOGY_PENALTY,
            "invalidated — failed validation and challenged on methodology".to_string(),
        )
    } else {
        let factor = (1.0 - EROSION_PER_CHALLENGE * received.len() as f64).max(EROSION_FLOOR);
        (
            true,
            factor,
            format!(
                "survived {} unresolved challenge(s), confidence ×{:.2}",
                received.len(),
                factor
            ),
        )
    };

    Resolution {
        agent_id: proposal.agent_id.clone(),
        is_valid,
        adjusted_confidence: clamp_unit(proposal.confidence * factor),
        challenges_received: received.len(),
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::Analysis;

    fn proposal(agent: &str, confidence: f64) -> Proposal {
        Proposal::from_analysis(agent, Analysis::new("some conclusion", confidence))
    }

    fn challenge(from: &str, to: &str, kind: ChallengeKind) -> Challenge {
        Challenge {
            challenger_id: from.to_string(),
            target_id: to.to_string(),
            kind,
            description: String::new(),
            counter_evidence: None,
        }
    }

    #[test]
    fn test_unchallenged_keeps_confidence() {
        let r = resolve_one(&proposal("a", 0.83), &[], ValidationVerdict::Inconclusive);
        assert!(r.is_valid);
        assert_eq!(r.adjusted_confidence, 0.83);
        assert_eq!(r.challenges_received, 0);
    }

    #[test]
    fn test_two_contradictions_invalidate() {
        let c1 = challenge("b", "a", ChallengeKind::Contradiction);
        let c2 = challenge("c", "a", ChallengeKind::Contradiction);
        let r = resolve_one(&proposal("a", 0.8), &[&c1, &c2], ValidationVerdict::Passed);
        assert!(!r.is_valid);
        assert!((r.adjusted_confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_methodology_only_invalidates_failed_validation() {
        let c = challenge("b", "a", ChallengeKind::Methodology);

        let failed = resolve_one(&proposal("a", 1.0), &[&c], ValidationVerdict::Failed);
        assert!(!failed.is_valid);
        assert!((failed.adjusted_confidence - 0.7).abs() < 1e-9);

        let inconclusive = resolve_one(&proposal("a", 1.0), &[&c], ValidationVerdict::Inconclusive);
        assert!(inconclusive.is_valid);
        assert!((inconclusive.adjusted_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_erosion_is_floored() {
        let challenges: Vec<Challenge> = (0..8)
            .map(|i| challenge(&format!("p{}", i), "a", ChallengeKind::ConfidenceDisparity))
            .collect();
        let refs: Vec<&Challenge> = challenges.iter().collect();

        let r = resolve_one(&proposal("a", 0.8), &refs[..3], ValidationVerdict::Inconclusive);
        assert!((r.adjusted_confidence - 0.56).abs() < 1e-9);

        let r = resolve_one(&proposal("a", 0.8), &refs, ValidationVerdict::Inconclusive);
        assert!(r.is_valid);
        assert!((r.adjusted_confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_logs_every_agent() {
        let proposals = vec![proposal("a", 0.9), proposal("b", 0.9)];
        let challenges = vec![challenge("a", "b", ChallengeKind::Contradiction)];
        let log = DebateLog::new("t");

        let resolutions =
            ResolutionEngine::new().resolve(&proposals, &challenges, &ValidationMap::new(), &log);

        assert_eq!(resolutions.len(), 2);
        assert_eq!(resolutions["a"].adjusted_confidence, 0.9);
        assert!(resolutions["b"].is_valid);
        assert_eq!(log.entries_for(DebateStage::Resolution).len(), 2);
    }
}
