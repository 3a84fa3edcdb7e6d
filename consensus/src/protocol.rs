//! Consensus protocol: drives one debate run end to end.
//!
//! Ties together the collector, challenge evaluator, resolution engine and
//! consensus calculator behind the run state machine. Each phase is a full
//! barrier. Configuration problems are the only errors a run returns; every
//! collaborator failure degrades to a fallback or an inconclusive result.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentRegistry, RegistryError};
use crate::challenge::{Challenge, ChallengeEvaluator, ValidationMap};
use crate::collector::ProposalCollector;
use crate::config::{ConfigError, ConsensusConfig};
use crate::log::{DebateLog, DebateLogEntry, SharedDebateLog};
use crate::proposal::Proposal;
use crate::provider::{LogicValidator, ProviderSet, TaskData};
use crate::resolution::{ResolutionEngine, ResolutionMap};
use crate::similarity::SimilarityClassifier;
use crate::state::{ProtocolPhase, RunState, TransitionError};
use crate::store::{DebateStore, DebateTranscript, InMemoryDebateStore, StoreError};
use crate::voting::{ConsensusCalculator, ConsensusOutcome, WeightTable};

/// Errors that abort a run before Phase 1, or fail a log query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("No agents registered")]
    EmptyRegistry,

    #[error("No analysis provider for specialty {specialty} (agent {agent_id})")]
    MissingProvider { agent_id: String, specialty: String },

    #[error("Similarity classifier misconfigured: {0}")]
    InvalidClassifier(String),

    #[error("State error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRun {
    pub task_id: String,
    pub run_id: Uuid,
    /// Proposals in completion order, fallbacks last.
    pub proposals: Vec<Proposal>,
    pub challenges: Vec<Challenge>,
    pub validation: ValidationMap,
    pub resolutions: ResolutionMap,
    pub outcome: ConsensusOutcome,
    pub state: RunState,
    pub entries: Vec<DebateLogEntry>,
    pub max_debate_rounds: u32,
    pub rounds_run: u32,
    /// The debate time limit fired before the concurrent phases finished.
    pub deadline_exceeded: bool,
    /// The caller's token was cancelled during the run.
    pub cancelled: bool,
}

impl DebateRun {
    pub fn is_consensus(&self) -> bool {
        self.state.phase == ProtocolPhase::ConsensusReached
    }

    pub fn transcript(&self) -> DebateTranscript {
        DebateTranscript::new(
            &self.task_id,
            self.run_id,
            self.entries.clone(),
            self.outcome.clone(),
        )
    }

    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        format!(
            "{} | task={} proposals={} challenges={}",
            self.outcome.summary_line(),
            self.task_id,
            self.proposals.len(),
            self.challenges.len()
        )
    }
}

/// The protocol entry point.
///
/// Constructed explicitly with its registry, providers and classifier; no
/// global state. Runs take `&self`, so registry changes need `&mut self` and
/// can never interleave with a run.
pub struct ConsensusProtocol {
    registry: AgentRegistry,
    providers: ProviderSet,
    classifier: Arc<dyn SimilarityClassifier>,
    validator: Option<Arc<dyn LogicValidator>>,
    store: Arc<dyn DebateStore>,
}

impl ConsensusProtocol {
    pub fn new(
        registry: AgentRegistry,
        providers: ProviderSet,
        classifier: Arc<dyn SimilarityClassifier>,
    ) -> Self {
        Self {
            registry,
            providers,
            classifier,
            validator: None,
            store: Arc::new(InMemoryDebateStore::new()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn LogicValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DebateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    pub fn providers_mut(&mut self) -> &mut ProviderSet {
        &mut self.providers
    }

    /// Run the protocol and return only the outcome.
    pub async fn run_consensus(
        &self,
        task_id: &str,
        task_description: &str,
        task_data: &TaskData,
        config: &ConsensusConfig,
    ) -> Result<ConsensusOutcome> {
        self.run(task_id, task_description, task_data, config)
            .await
            .map(|run| run.outcome)
    }

    /// Run the protocol and return the full run context.
    pub async fn run(
        &self,
        task_id: &str,
        task_description: &str,
        task_data: &TaskData,
        config: &ConsensusConfig,
    ) -> Result<DebateRun> {
        self.run_with_cancel(
            task_id,
            task_description,
            task_data,
            config,
            CancellationToken::new(),
        )
        .await
    }

    /// Run with a caller-held cancellation token.
    pub async fn run_with_cancel(
        &self,
        task_id: &str,
        task_description: &str,
        task_data: &TaskData,
        config: &ConsensusConfig,
        cancel: CancellationToken,
    ) -> Result<DebateRun> {
        let log = DebateLog::new(task_id).shared();
        self.run_with_log(log, task_description, task_data, config, cancel)
            .await
    }

    /// Run against a log the caller created, e.g. to `subscribe()` first.
    pub async fn run_with_log(
        &self,
        log: SharedDebateLog,
        task_description: &str,
        task_data: &TaskData,
        config: &ConsensusConfig,
        cancel: CancellationToken,
    ) -> Result<DebateRun> {
        self.check_ready(config)?;

        let task_id = log.task_id().to_string();
        let run_id = Uuid::new_v4();
        let mut state = RunState::new();
        let agents = self.registry.all();

        info!(
            task_id = %task_id,
            run_id = %run_id,
            agents = agents.len(),
            "starting consensus run"
        );

        // Deadline fires a child token so the caller's token stays untouched.
        let token = cancel.child_token();
        let timer = config.debate_time_limit().map(|limit| {
            let guard = token.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        warn!(
                            task_id = %task_id,
                            limit_ms = limit.as_millis() as u64,
                            "debate time limit reached — cancelling outstanding work"
                        );
                        guard.cancel();
                    }
                    _ = guard.cancelled() => {}
                }
            })
        });

        state.transition(ProtocolPhase::Proposal, "collecting proposals")?;
        let collector = ProposalCollector::new(
            self.providers.clone(),
            config.provider_timeout(),
            config.max_concurrency,
        );
        let proposals = collector
            .collect(task_description, task_data, agents, &log, &token)
            .await;

        state.transition(ProtocolPhase::Challenge, "proposals collected")?;
        let evaluator =
            ChallengeEvaluator::new(self.classifier.clone(), config.confidence_disparity_threshold)
                .with_validator(self.validator.clone(), config.validator_timeout())
                .with_max_concurrency(config.max_concurrency);
        let round = evaluator.evaluate(&proposals, &log, &token).await;

        let cancelled = cancel.is_cancelled();
        let deadline_exceeded = token.is_cancelled() && !cancelled;
        if let Some(timer) = timer {
            timer.abort();
        }

        state.transition(ProtocolPhase::Resolution, "challenges evaluated")?;
        let resolutions =
            ResolutionEngine::new().resolve(&proposals, &round.challenges, &round.validation, &log);

        state.transition(ProtocolPhase::Consensus, "proposals resolved")?;
        let weights = WeightTable::from_registry(&self.registry, config);
        let outcome = ConsensusCalculator::new(self.classifier.clone()).compute(
            &proposals,
            &resolutions,
            &weights,
            config,
            &log,
        );

        let terminal = if outcome.achieved {
            ProtocolPhase::ConsensusReached
        } else {
            ProtocolPhase::DissentRecorded
        };
        state.transition(terminal, &outcome.summary_line())?;

        let run = DebateRun {
            task_id,
            run_id,
            proposals,
            challenges: round.challenges,
            validation: round.validation,
            resolutions,
            outcome,
            state,
            entries: log.entries(),
            max_debate_rounds: config.max_debate_rounds,
            rounds_run: 1,
            deadline_exceeded,
            cancelled,
        };

        if let Err(e) = self.store.save(&run.transcript()) {
            warn!(task_id = %run.task_id, error = %e, "failed to persist debate transcript");
        }

        info!(
            task_id = %run.task_id,
            run_id = %run.run_id,
            phase = %run.state.phase,
            entries = run.entries.len(),
            deadline_exceeded,
            cancelled,
            "{}",
            run.outcome.summary_line()
        );

        Ok(run)
    }

    /// Ordered log of the most recent run of `task_id`, if any.
    pub fn debate_log(&self, task_id: &str) -> Result<Option<Vec<DebateLogEntry>>> {
        Ok(self.store.load(task_id)?.map(|t| t.entries))
    }

    /// Stored transcript of the most recent run of `task_id`, if any.
    pub fn transcript(&self, task_id: &str) -> Result<Option<DebateTranscript>> {
        Ok(self.store.load(task_id)?)
    }

    fn check_ready(&self, config: &ConsensusConfig) -> Result<()> {
        if self.registry.is_empty() {
            return Err(ProtocolError::EmptyRegistry);
        }
        config.validate(&self.registry)?;
        self.classifier
            .validate()
            .map_err(|e| ProtocolError::InvalidClassifier(e.to_string()))?;
        for agent in self.registry.all() {
            if !self.providers.contains(&agent.specialty) {
                return Err(ProtocolError::MissingProvider {
                    agent_id: agent.id.clone(),
                    specialty: agent.specialty.clone(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConsensusProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusProtocol")
            .field("registry", &self.registry)
            .field("providers", &self.providers)
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::proposal::Analysis;
    use crate::provider::{AnalysisProvider, ProviderError};
    use crate::similarity::OverlapClassifier;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Fixed(&'static str, f64);

    #[async_trait]
    impl AnalysisProvider for Fixed {
        async fn generate_proposal(
            &self,
            _task_description: &str,
            _task_data: &TaskData,
        ) -> std::result::Result<Analysis, ProviderError> {
            Ok(Analysis::new(self.0, self.1))
        }
    }

    fn protocol(n: usize) -> ConsensusProtocol {
        let mut registry = AgentRegistry::new();
        let mut providers = ProviderSet::new();
        for i in 0..n {
            let specialty = format!("s{i}");
            registry
                .register(Agent::new(&format!("agent-{i}"), &specialty, 1.0))
                .unwrap();
            providers.insert(&specialty, Arc::new(Fixed("notify lender", 0.9)));
        }
        ConsensusProtocol::new(registry, providers, Arc::new(OverlapClassifier::default()))
    }

    #[tokio::test]
    async fn test_empty_registry_rejected() {
        let p = ConsensusProtocol::new(
            AgentRegistry::new(),
            ProviderSet::new(),
            Arc::new(OverlapClassifier::default()),
        );
        let err = p
            .run("t", "task", &Value::Null, &ConsensusConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::EmptyRegistry);
    }

    #[tokio::test]
    async fn test_missing_provider_rejected() {
        let mut p = protocol(3);
        p.registry_mut()
            .register(Agent::new("extra", "unknown", 1.0))
            .unwrap();
        let err = p
            .run("t", "task", &Value::Null, &ConsensusConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingProvider { .. }));
    }

    #[tokio::test]
    async fn test_out_of_range_threshold_rejected_before_collection() {
        let base = protocol(3);
        let p = ConsensusProtocol::new(
            base.registry().clone(),
            base.providers.clone(),
            Arc::new(OverlapClassifier::new(1.5)),
        );
        let log = DebateLog::new("t").shared();
        let err = p
            .run_with_log(
                log.clone(),
                "task",
                &Value::Null,
                &ConsensusConfig::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidClassifier(ref m) if m.contains("1.5")));
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_run_walks_every_phase() {
        let run = protocol(3)
            .run("t", "task", &Value::Null, &ConsensusConfig::default())
            .await
            .unwrap();

        assert!(run.is_consensus());
        assert_eq!(
            run.state.path(),
            vec![
                ProtocolPhase::Idle,
                ProtocolPhase::Proposal,
                ProtocolPhase::Challenge,
                ProtocolPhase::Resolution,
                ProtocolPhase::Consensus,
                ProtocolPhase::ConsensusReached,
            ]
        );
        assert_eq!(run.rounds_run, 1);
        assert!(!run.deadline_exceeded);
    }

    #[tokio::test]
    async fn test_debate_log_available_after_run() {
        let p = protocol(3);
        assert!(p.debate_log("t").unwrap().is_none());

        let run = p
            .run("t", "task", &Value::Null, &ConsensusConfig::default())
            .await
            .unwrap();
        let entries = p.debate_log("t").unwrap().unwrap();
        assert_eq!(entries, run.entries);
    }
}
