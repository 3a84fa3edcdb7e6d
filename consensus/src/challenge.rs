//! Peer challenges: every agent tests every other agent's proposal.
//!
//! Two steps, each a full barrier:
//!
//! 1. **Validation**: the optional [`LogicValidator`] checks each proposal
//!    once (concurrently, per-call timeout). Missing validator, failures and
//!    timeouts all yield [`ValidationVerdict::Inconclusive`].
//! 2. **Pairwise tests**: one task per target batches its inbound pairs and
//!    runs the contradiction, confidence-disparity and methodology tests.
//!
//! Fallback proposals carry no analysis: they neither raise nor receive
//! challenges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentId;
use crate::log::{DebateLog, DebateStage};
use crate::proposal::{truncate, Evidence, Proposal};
use crate::provider::{CollaboratorError, LogicValidator};
use crate::similarity::SimilarityClassifier;

/// Kind of objection raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// The two proposals assert mutually exclusive outcomes.
    Contradiction,
    /// The confidences differ by more than the configured threshold.
    ConfidenceDisparity,
    /// The challenger's reasoning validated and the target's did not.
    Methodology,
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contradiction => write!(f, "contradiction"),
            Self::ConfidenceDisparity => write!(f, "confidence_disparity"),
            Self::Methodology => write!(f, "methodology"),
        }
    }
}

/// One agent's objection to another's proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenger_id: AgentId,
    pub target_id: AgentId,
    pub kind: ChallengeKind,
    pub description: String,
    /// The challenger's own evidence, when it has any.
    pub counter_evidence: Option<Vec<Evidence>>,
}

impl Challenge {
    /// Single-line form for log summaries.
    pub fn summary(&self) -> String {
        format!(
            "{} → {} [{}]: {}",
            self.challenger_id, self.target_id, self.kind, self.description
        )
    }
}

/// Result of the independent validity check on one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    Passed,
    Failed,
    /// No validator, validator error, timeout, or cancellation.
    Inconclusive,
}

/// Validity verdicts keyed by agent id.
pub type ValidationMap = HashMap<AgentId, ValidationVerdict>;

/// Output of the challenge phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChallengeRound {
    pub challenges: Vec<Challenge>,
    pub validation: ValidationMap,
}

/// Runs validation and the pairwise challenge tests.
#[derive(Clone)]
pub struct ChallengeEvaluator {
    classifier: Arc<dyn SimilarityClassifier>,
    validator: Option<Arc<dyn LogicValidator>>,
    disparity_threshold: f64,
    validator_timeout: Duration,
    max_concurrency: usize,
}

impl ChallengeEvaluator {
    pub fn new(classifier: Arc<dyn SimilarityClassifier>, disparity_threshold: f64) -> Self {
        Self {
            classifier,
            validator: None,
            disparity_threshold,
            validator_timeout: Duration::from_secs(10),
            max_concurrency: 8,
        }
    }

    pub fn with_validator(
        mut self,
        validator: Option<Arc<dyn LogicValidator>>,
        timeout: Duration,
    ) -> Self {
        self.validator = validator;
        self.validator_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Validate, then evaluate all ordered pairs. Every emitted challenge is
    /// logged before this returns.
    pub async fn evaluate(
        &self,
        proposals: &[Proposal],
        log: &DebateLog,
        cancel: &CancellationToken,
    ) -> ChallengeRound {
        let validation = self.validate_all(proposals, cancel).await;

        let proposals: Arc<Vec<Proposal>> = Arc::new(proposals.to_vec());
        let shared_validation = Arc::new(validation.clone());
        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<Vec<Challenge>> = JoinSet::new();

        for target_idx in 0..proposals.len() {
            if proposals[target_idx].fallback {
                continue;
            }
            let proposals = proposals.clone();
            let validation = shared_validation.clone();
            let classifier = self.classifier.clone();
            let sem = sem.clone();
            let threshold = self.disparity_threshold;

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Vec::new();
                };
                challenges_against(
                    &proposals[target_idx],
                    &proposals,
                    &validation,
                    classifier.as_ref(),
                    threshold,
                )
            });
        }

        let mut challenges = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    warn!(task_id = %log.task_id(), outstanding = join_set.len(), "challenge evaluation cancelled");
                    cancelled = true;
                    join_set.abort_all();
                }
                next = join_set.join_next() => match next {
                    Some(Ok(batch)) => {
                        for challenge in batch {
                            log.append(DebateStage::Challenge, Some(&challenge.challenger_id), challenge.summary());
                            challenges.push(challenge);
                        }
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!(error = %e, "challenge task panicked"),
                    None => break,
                },
            }
        }

        info!(
            task_id = %log.task_id(),
            challenges = challenges.len(),
            cancelled,
            "challenge phase complete"
        );

        ChallengeRound {
            challenges,
            validation,
        }
    }

    /// Deterministic, sequential pairwise evaluation.
    pub fn evaluate_pairs(&self, proposals: &[Proposal], validation: &ValidationMap) -> Vec<Challenge> {
        proposals
            .iter()
            .filter(|p| !p.fallback)
            .flat_map(|target| {
                challenges_against(
                    target,
                    proposals,
                    validation,
                    self.classifier.as_ref(),
                    self.disparity_threshold,
                )
            })
            .collect()
    }

    /// Ask the validator about every non-fallback proposal.
    pub async fn validate_all(
        &self,
        proposals: &[Proposal],
        cancel: &CancellationToken,
    ) -> ValidationMap {
        let mut verdicts: ValidationMap = proposals
            .iter()
            .map(|p| (p.agent_id.clone(), ValidationVerdict::Inconclusive))
            .collect();

        let Some(validator) = self.validator.clone() else {
            debug!("no logic validator configured — methodology challenges disabled");
            return verdicts;
        };

        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<(AgentId, ValidationVerdict)> = JoinSet::new();

        for proposal in proposals.iter().filter(|p| !p.fallback) {
            let validator = validator.clone();
            let sem = sem.clone();
            let agent_id = proposal.agent_id.clone();
            let text = proposal.text.clone();
            let evidence = proposal.evidence.clone();
            let timeout = self.validator_timeout;

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (agent_id, ValidationVerdict::Inconclusive);
                };
                let verdict = match tokio::time::timeout(timeout, validator.validate(&text, &evidence)).await {
                    Ok(Ok(true)) => ValidationVerdict::Passed,
                    Ok(Ok(false)) => ValidationVerdict::Failed,
                    Ok(Err(e)) => {
                        warn!(agent_id = %agent_id, error = %e, "logic validator failed — inconclusive");
                        ValidationVerdict::Inconclusive
                    }
                    Err(_) => {
                        let e = CollaboratorError::TimedOut(timeout.as_millis() as u64);
                        warn!(agent_id = %agent_id, error = %e, "logic validator timed out — inconclusive");
                        ValidationVerdict::Inconclusive
                    }
                };
                (agent_id, verdict)
            });
        }

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    warn!(outstanding = join_set.len(), "validation cancelled");
                    cancelled = true;
                    join_set.abort_all();
                }
                next = join_set.join_next() => match next {
                    Some(Ok((agent_id, verdict))) => {
                        verdicts.insert(agent_id, verdict);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!(error = %e, "validator task panicked"),
                    None => break,
                },
            }
        }

        verdicts
    }
}

impl std::fmt::Debug for ChallengeEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeEvaluator")
            .field("has_validator", &self.validator.is_some())
            .field("disparity_threshold", &self.disparity_threshold)
            .field("validator_timeout", &self.validator_timeout)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

/// All challenges raised against `target` by the other non-fallback proposals.
fn challenges_against(
    target: &Proposal,
    proposals: &[Proposal],
    validation: &ValidationMap,
    classifier: &dyn SimilarityClassifier,
    disparity_threshold: f64,
) -> Vec<Challenge> {
    let verdict = |id: &str| {
        validation
            .get(id)
            .copied()
            .unwrap_or(ValidationVerdict::Inconclusive)
    };
    let target_verdict = verdict(&target.agent_id);
    let mut raised = Vec::new();

    for challenger in proposals
        .iter()
        .filter(|p| !p.fallback && p.agent_id != target.agent_id)
    {
        let counter_evidence =
            (!challenger.evidence.is_empty()).then(|| challenger.evidence.clone());

        match classifier.are_contradictory(&challenger.text, &target.text) {
            Ok(true) => raised.push(Challenge {
                challenger_id: challenger.agent_id.clone(),
                target_id: target.agent_id.clone(),
                kind: ChallengeKind::Contradiction,
                description: format!(
                    "\"{}\" contradicts \"{}\"",
                    truncate(&challenger.text, 60),
                    truncate(&target.text, 60)
                ),
                counter_evidence: counter_evidence.clone(),
            }),
            Ok(false) => {}
            Err(e) => warn!(
                challenger = %challenger.agent_id,
                target = %target.agent_id,
                error = %e,
                "contradiction test inconclusive"
            ),
        }

        let gap = (challenger.confidence - target.confidence).abs();
        if gap > disparity_threshold {
            raised.push(Challenge {
                challenger_id: challenger.agent_id.clone(),
                target_id: target.agent_id.clone(),
                kind: ChallengeKind::ConfidenceDisparity,
                description: format!(
                    "confidence {:.2} vs {:.2} (gap {:.2} > {:.2})",
                    challenger.confidence, target.confidence, gap, disparity_threshold
                ),
                counter_evidence: None,
            });
        }

        if verdict(&challenger.agent_id) == ValidationVerdict::Passed
            && target_verdict == ValidationVerdict::Failed
        {
            raised.push(Challenge {
                challenger_id: challenger.agent_id.clone(),
                target_id: target.agent_id.clone(),
                kind: ChallengeKind::Methodology,
                description: "conclusion does not follow from its evidence".to_string(),
                counter_evidence,
            });
        }
    }

    raised
}
