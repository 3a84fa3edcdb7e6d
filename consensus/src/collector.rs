//! Proposal collection: JoinSet fan-out/fan-in over analysis providers.
//!
//! ```text
//! JoinSet::spawn(provider(agent_i)) × N   (Semaphore-bounded)
//!         │
//!         ▼  join_next() in completion order → debate log
//!  wait-all barrier (or cancellation)
//!         │
//!         ▼
//!  fallback proposal for every agent without a result
//! ```
//!
//! ## Failure policy
//!
//! A provider error, timeout, NaN confidence, panic or cancellation never
//! fails the round: the agent gets a zero-confidence fallback proposal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::log::{DebateLog, DebateStage};
use crate::proposal::Proposal;
use crate::provider::{ProviderSet, TaskData};

/// Collects one proposal per agent.
#[derive(Debug, Clone)]
pub struct ProposalCollector {
    providers: ProviderSet,
    timeout: Duration,
    max_concurrency: usize,
}

impl ProposalCollector {
    pub fn new(providers: ProviderSet, timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            providers,
            timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run every agent's provider and wait for all of them.
    ///
    /// Proposals are returned (and logged) in completion order; fallbacks for
    /// agents that produced nothing come last, in registration order.
    pub async fn collect(
        &self,
        task_description: &str,
        task_data: &TaskData,
        agents: &[Agent],
        log: &DebateLog,
        cancel: &CancellationToken,
    ) -> Vec<Proposal> {
        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let description: Arc<str> = Arc::from(task_description);
        let data = Arc::new(task_data.clone());
        let mut join_set: JoinSet<Proposal> = JoinSet::new();

        for agent in agents {
            let Some(provider) = self.providers.get(&agent.specialty) else {
                warn!(
                    agent_id = %agent.id,
                    specialty = %agent.specialty,
                    "no provider for specialty — substituting fallback"
                );
                continue;
            };

            let sem = sem.clone();
            let description = description.clone();
            let data = data.clone();
            let agent_id = agent.id.clone();
            let timeout = self.timeout;

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Proposal::fallback(&agent_id);
                };

                let call = provider.generate_proposal(&description, &data);
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(analysis)) if analysis.confidence.is_nan() => {
                        warn!(agent_id = %agent_id, "provider returned NaN confidence");
                        Proposal::fallback(&agent_id)
                    }
                    Ok(Ok(analysis)) => Proposal::from_analysis(&agent_id, analysis),
                    Ok(Err(e)) => {
                        warn!(agent_id = %agent_id, error = %e, "provider call failed");
                        Proposal::fallback(&agent_id)
                    }
                    Err(_) => {
                        warn!(
                            agent_id = %agent_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "provider call timed out"
                        );
                        Proposal::fallback(&agent_id)
                    }
                }
            });
        }

        let mut proposals: Vec<Proposal> = Vec::with_capacity(agents.len());
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    warn!(
                        task_id = %log.task_id(),
                        outstanding = join_set.len(),
                        "proposal collection cancelled"
                    );
                    cancelled = true;
                    join_set.abort_all();
                }
                next = join_set.join_next() => match next {
                    Some(Ok(proposal)) => {
                        debug!(agent_id = %proposal.agent_id, fallback = proposal.fallback, "proposal collected");
                        log.append(DebateStage::Proposal, Some(&proposal.agent_id), proposal.summary());
                        proposals.push(proposal);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!(error = %e, "provider task panicked"),
                    None => break,
                },
            }
        }

        let seen: HashSet<String> = proposals.iter().map(|p| p.agent_id.clone()).collect();
        for agent in agents.iter().filter(|a| !seen.contains(&a.id)) {
            let proposal = Proposal::fallback(&agent.id);
            log.append(DebateStage::Proposal, Some(&agent.id), proposal.summary());
            proposals.push(proposal);
        }

        info!(
            task_id = %log.task_id(),
            total = proposals.len(),
            fallbacks = proposals.iter().filter(|p| p.fallback).count(),
            cancelled,
            "proposal phase complete"
        );

        proposals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{Analysis, FALLBACK_TEXT};
    use crate::provider::{AnalysisProvider, ProviderError};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Scripted {
        text: &'static str,
        confidence: f64,
        delay: Duration,
    }

    #[async_trait]
    impl AnalysisProvider for Scripted {
        async fn generate_proposal(
            &self,
            _task_description: &str,
            _task_data: &TaskData,
        ) -> Result<Analysis, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(Analysis::new(self.text, self.confidence))
        }
    }

    struct Failing;

    #[async_trait]
    impl AnalysisProvider for Failing {
        async fn generate_proposal(
            &self,
            _task_description: &str,
            _task_data: &TaskData,
        ) -> Result<Analysis, ProviderError> {
            Err(ProviderError::RequestFailed("boom".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl AnalysisProvider for Panicking {
        async fn generate_proposal(
            &self,
            _task_description: &str,
            _task_data: &TaskData,
        ) -> Result<Analysis, ProviderError> {
            panic!("provider bug");
        }
    }

    fn scripted(text: &'static str, confidence: f64, delay_ms: u64) -> Arc<Scripted> {
        Arc::new(Scripted {
            text,
            confidence,
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn agents(specialties: &[&str]) -> Vec<Agent> {
        specialties
            .iter()
            .map(|s| Agent::new(s, s, 1.0))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_logs_in_completion_order() {
        let providers = ProviderSet::new()
            .with("slow", scripted("slow answer", 0.8, 300))
            .with("fast", scripted("fast answer", 0.7, 10));
        let collector = ProposalCollector::new(providers, Duration::from_secs(5), 4);
        let log = DebateLog::new("t");

        let proposals = collector
            .collect(
                "task",
                &Value::Null,
                &agents(&["slow", "fast"]),
                &log,
                &CancellationToken::new(),
            )
            .await;

        let order: Vec<&str> = proposals.iter().map(|p| p.agent_id.as_str()).collect();
        assert_eq!(order, vec!["fast", "slow"]);
        let logged: Vec<String> = log
            .entries()
            .into_iter()
            .filter_map(|e| e.agent_id)
            .collect();
        assert_eq!(logged, vec!["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_fallback() {
        let providers = ProviderSet::new()
            .with("ok", scripted("answer", 0.9, 10))
            .with("stuck", scripted("never", 0.9, 60_000));
        let collector = ProposalCollector::new(providers, Duration::from_millis(100), 4);
        let log = DebateLog::new("t");

        let proposals = collector
            .collect(
                "task",
                &Value::Null,
                &agents(&["ok", "stuck"]),
                &log,
                &CancellationToken::new(),
            )
            .await;

        let stuck = proposals.iter().find(|p| p.agent_id == "stuck").unwrap();
        assert!(stuck.fallback);
        assert_eq!(stuck.text, FALLBACK_TEXT);
        assert_eq!(stuck.confidence, 0.0);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_error_panic_and_missing_provider_become_fallbacks() {
        let providers = ProviderSet::new()
            .with("bad", Arc::new(Failing))
            .with("panics", Arc::new(Panicking))
            .with("nan", scripted("confused", f64::NAN, 0));
        let collector = ProposalCollector::new(providers, Duration::from_secs(1), 2);
        let log = DebateLog::new("t");

        let proposals = collector
            .collect(
                "task",
                &Value::Null,
                &agents(&["bad", "panics", "nan", "unmapped"]),
                &log,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(proposals.len(), 4);
        assert!(proposals.iter().all(|p| p.fallback));
        assert_eq!(log.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_completed_proposals() {
        let providers = ProviderSet::new()
            .with("fast", scripted("fast answer", 0.7, 10))
            .with("slow", scripted("slow answer", 0.8, 10_000));
        let collector = ProposalCollector::new(providers, Duration::from_secs(60), 4);
        let log = DebateLog::new("t");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let proposals = collector
            .collect(
                "task",
                &Value::Null,
                &agents(&["fast", "slow"]),
                &log,
                &cancel,
            )
            .await;

        let fast = proposals.iter().find(|p| p.agent_id == "fast").unwrap();
        let slow = proposals.iter().find(|p| p.agent_id == "slow").unwrap();
        assert!(!fast.fallback);
        assert!(slow.fallback);
    }
}
