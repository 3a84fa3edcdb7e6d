//! Weighted consensus over resolved proposals.
//!
//! Valid proposals are grouped into similarity classes, each class is scored
//! by Σ weight × resolved confidence, and the heaviest class wins. Support is
//! measured against the total weight of *all* registered agents, so absent or
//! failed agents count against consensus.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{AgentId, AgentRegistry};
use crate::config::ConsensusConfig;
use crate::log::{DebateLog, DebateStage};
use crate::proposal::{truncate, Proposal};
use crate::resolution::ResolutionMap;
use crate::similarity::SimilarityClassifier;

/// Scores closer than this are treated as tied.
const TIE_EPSILON: f64 = 1e-9;

/// How the outcome was (or was not) reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    /// Every valid proposal is in the winning class.
    Unanimous,
    /// The winning class holds more than half of all registered agents.
    Majority,
    /// The winning class is large enough but not a majority.
    Weighted,
    /// No usable winner.
    Failed,
}

impl std::fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unanimous => write!(f, "unanimous"),
            Self::Majority => write!(f, "majority"),
            Self::Weighted => write!(f, "weighted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Preserved alternative of an agent that lost (or never entered) the vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DissentRecord {
    pub agent_id: AgentId,
    /// The agent's own proposal text.
    pub alternative_text: String,
    /// Resolved confidence, or the proposal's when it was never resolved.
    pub confidence: f64,
    /// Why it lost: an "outvoted by class led by ..." note, or
    /// "invalidated during debate" when nothing valid remained.
    pub reason: String,
}

/// Terminal artifact of a protocol run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    /// The winning class carries the decision under the configured rules.
    pub achieved: bool,
    pub method: ConsensusMethod,
    /// Representative text of the winning class; `None` when failed.
    pub winning_text: Option<String>,
    /// Members of the winning class; empty when failed.
    pub supporting_agent_ids: Vec<AgentId>,
    /// Valid proposals outside the winning class.
    pub dissenting_agent_ids: Vec<AgentId>,
    /// Agents whose analysis was unavailable (fallback proposals).
    pub abstaining_agent_ids: Vec<AgentId>,
    /// Members of the heaviest class, reported even when the method failed.
    pub leading_agent_ids: Vec<AgentId>,
    /// Equal to `support_percentage`, in [0, 1].
    pub confidence: f64,
    /// Winning class weight over total registered weight.
    pub support_percentage: f64,
    /// One per dissenter; one per agent when nothing valid remained.
    pub dissent_records: Vec<DissentRecord>,
}

impl ConsensusOutcome {
    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        let status = if self.achieved {
            "CONSENSUS"
        } else {
            "DISSENT"
        };
        format!(
            "[{}] method={} support={:.2} supporting={} dissenting={} abstaining={}",
            status,
            self.method,
            self.support_percentage,
            self.supporting_agent_ids.len(),
            self.dissenting_agent_ids.len(),
            self.abstaining_agent_ids.len()
        )
    }
}

/// A group of mutually similar valid proposals voting as one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusClass {
    /// First-seen member.
    pub representative: AgentId,
    pub representative_text: String,
    pub representative_at: DateTime<Utc>,
    pub members: Vec<AgentId>,
    /// Σ agent weight × resolved confidence over members.
    pub total_weight: f64,
}

/// Effective voting weights for one run, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    entries: Vec<(AgentId, f64)>,
}

impl WeightTable {
    pub fn new(entries: Vec<(AgentId, f64)>) -> Self {
        Self { entries }
    }

    /// Registry weights with the config's per-run overrides applied.
    pub fn from_registry(registry: &AgentRegistry, config: &ConsensusConfig) -> Self {
        Self::new(config.effective_weights(registry))
    }

    pub fn weight_of(&self, agent_id: &str) -> f64 {
        self.entries
            .iter()
            .find(|(id, _)| id == agent_id)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn position(&self, agent_id: &str) -> usize {
        self.entries
            .iter()
            .position(|(id, _)| id == agent_id)
            .unwrap_or(usize::MAX)
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Groups, scores and classifies resolved proposals.
#[derive(Clone)]
pub struct ConsensusCalculator {
    classifier: Arc<dyn SimilarityClassifier>,
}

impl ConsensusCalculator {
    pub fn new(classifier: Arc<dyn SimilarityClassifier>) -> Self {
        Self { classifier }
    }

    /// Group valid, non-fallback proposals into similarity classes.
    ///
    /// Candidates are visited by creation time, then registration order; each
    /// joins the first class whose representative it is similar to.
    pub fn group(
        &self,
        proposals: &[Proposal],
        resolutions: &ResolutionMap,
        weights: &WeightTable,
    ) -> Vec<ConsensusClass> {
        let mut candidates: Vec<&Proposal> = proposals
            .iter()
            .filter(|p| !p.fallback && is_valid(p, resolutions))
            .collect();
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| weights.position(&a.agent_id).cmp(&weights.position(&b.agent_id)))
        });

        let mut classes: Vec<ConsensusClass> = Vec::new();
        for proposal in candidates {
            let contribution =
                weights.weight_of(&proposal.agent_id) * resolved_confidence(proposal, resolutions);

            let home = classes.iter_mut().find(|class| {
                match self
                    .classifier
                    .are_similar(&class.representative_text, &proposal.text)
                {
                    Ok(similar) => similar,
                    Err(e) => {
                        warn!(
                            representative = %class.representative,
                            agent_id = %proposal.agent_id,
                            error = %e,
                            "similarity test inconclusive — treating as distinct"
                        );
                        false
                    }
                }
            });

            match home {
                Some(class) => {
                    class.members.push(proposal.agent_id.clone());
                    class.total_weight += contribution;
                }
                None => classes.push(ConsensusClass {
                    representative: proposal.agent_id.clone(),
                    representative_text: proposal.text.clone(),
                    representative_at: proposal.created_at,
                    members: vec![proposal.agent_id.clone()],
                    total_weight: contribution,
                }),
            }
        }
        classes
    }

    /// Compute the outcome and append the consensus entry to the log.
    pub fn compute(
        &self,
        proposals: &[Proposal],
        resolutions: &ResolutionMap,
        weights: &WeightTable,
        config: &ConsensusConfig,
        log: &DebateLog,
    ) -> ConsensusOutcome {
        let outcome = self.decide(proposals, resolutions, weights, config);

        info!(
            task_id = %log.task_id(),
            method = %outcome.method,
            achieved = outcome.achieved,
            support = outcome.support_percentage,
            "consensus phase complete"
        );
        let detail = match (&outcome.winning_text, outcome.leading_agent_ids.is_empty()) {
            (Some(text), _) => format!("{} — \"{}\"", outcome.summary_line(), truncate(text, 80)),
            (None, false) => format!(
                "{} — leading class [{}] below requirements",
                outcome.summary_line(),
                outcome.leading_agent_ids.join(", ")
            ),
            (None, true) => format!("{} — no valid proposals", outcome.summary_line()),
        };
        log.append(DebateStage::Consensus, None, detail);

        outcome
    }

    fn decide(
        &self,
        proposals: &[Proposal],
        resolutions: &ResolutionMap,
        weights: &WeightTable,
        config: &ConsensusConfig,
    ) -> ConsensusOutcome {
        let abstaining: Vec<AgentId> = proposals
            .iter()
            .filter(|p| p.fallback)
            .map(|p| p.agent_id.clone())
            .collect();

        let classes = self.group(proposals, resolutions, weights);
        let valid_count: usize = classes.iter().map(|c| c.members.len()).sum();

        let Some(winner) = pick_winner(&classes) else {
            return ConsensusOutcome {
                achieved: false,
                method: ConsensusMethod::Failed,
                winning_text: None,
                supporting_agent_ids: Vec::new(),
                dissenting_agent_ids: Vec::new(),
                abstaining_agent_ids: abstaining,
                leading_agent_ids: Vec::new(),
                confidence: 0.0,
                support_percentage: 0.0,
                dissent_records: proposals
                    .iter()
                    .map(|p| DissentRecord {
                        agent_id: p.agent_id.clone(),
                        alternative_text: p.text.clone(),
                        confidence: resolved_confidence(p, resolutions),
                        reason: "invalidated during debate".to_string(),
                    })
                    .collect(),
            };
        };

        let total = weights.total();
        let support = if total > 0.0 {
            (winner.total_weight / total).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let covers_all = winner.members.len() == valid_count;
        let mut achieved =
            support >= config.consensus_threshold && (!config.require_unanimous || covers_all);

        let method = if valid_count < config.min_agents_for_consensus {
            ConsensusMethod::Failed
        } else if covers_all {
            ConsensusMethod::Unanimous
        } else if winner.members.len() * 2 > weights.len() {
            ConsensusMethod::Majority
        } else if winner.members.len() >= config.min_agents_for_consensus {
            ConsensusMethod::Weighted
        } else {
            ConsensusMethod::Failed
        };
        if method == ConsensusMethod::Failed {
            achieved = false;
        }

        let winners: HashSet<&str> = winner.members.iter().map(String::as_str).collect();
        let dissenters: Vec<&Proposal> = classes
            .iter()
            .flat_map(|c| c.members.iter())
            .filter(|id| !winners.contains(id.as_str()))
            .filter_map(|id| proposals.iter().find(|p| &p.agent_id == id))
            .collect();

        let dissent_records = dissenters
            .iter()
            .map(|p| DissentRecord {
                agent_id: p.agent_id.clone(),
                alternative_text: p.text.clone(),
                confidence: resolved_confidence(p, resolutions),
                reason: format!(
                    "outvoted by class led by {} ({:.2} vs own weight {:.2})",
                    winner.representative,
                    winner.total_weight,
                    weights.weight_of(&p.agent_id) * resolved_confidence(p, resolutions)
                ),
            })
            .collect();

        let failed = method == ConsensusMethod::Failed;
        ConsensusOutcome {
            achieved,
            method,
            winning_text: (!failed).then(|| winner.representative_text.clone()),
            supporting_agent_ids: if failed {
                Vec::new()
            } else {
                winner.members.clone()
            },
            dissenting_agent_ids: dissenters.iter().map(|p| p.agent_id.clone()).collect(),
            abstaining_agent_ids: abstaining,
            leading_agent_ids: winner.members.clone(),
            confidence: support,
            support_percentage: support,
            dissent_records,
        }
    }
}

impl std::fmt::Debug for ConsensusCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusCalculator").finish_non_exhaustive()
    }
}

/// Heaviest class; ties go to the earliest representative (class order).
fn pick_winner(classes: &[ConsensusClass]) -> Option<&ConsensusClass> {
    classes.iter().fold(None, |best: Option<&ConsensusClass>, class| match best {
        Some(b) if class.total_weight <= b.total_weight + TIE_EPSILON => Some(b),
        _ => Some(class),
    })
}

fn is_valid(proposal: &Proposal, resolutions: &ResolutionMap) -> bool {
    resolutions
        .get(&proposal.agent_id)
        .map(|r| r.is_valid)
        .unwrap_or(true)
}

fn resolved_confidence(proposal: &Proposal, resolutions: &ResolutionMap) -> f64 {
    resolutions
        .get(&proposal.agent_id)
        .map(|r| r.adjusted_confidence)
        .unwrap_or(proposal.confidence)
}
