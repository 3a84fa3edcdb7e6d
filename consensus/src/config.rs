//! Protocol configuration: defaults, TOML loading, environment overlay and
//! validation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentRegistry;

/// Configuration errors, raised before any phase starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("consensus_threshold {0} outside [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("confidence_disparity_threshold {0} outside [0, 1]")]
    DisparityOutOfRange(f64),

    #[error("min_agents_for_consensus must be at least 1")]
    ZeroMinAgents,

    #[error("max_debate_rounds must be at least 1")]
    ZeroRounds,

    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Weight override for {agent_id} must be finite and > 0, got {weight}")]
    InvalidWeightOverride { agent_id: String, weight: f64 },

    #[error("Weight override for unregistered agent {0}")]
    UnknownAgent(String),

    #[error("Failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Configuration for one protocol invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum valid proposals (and winning class size for `weighted`).
    pub min_agents_for_consensus: usize,
    /// Support fraction of total registered weight needed for `achieved`.
    pub consensus_threshold: f64,
    /// Require the winning class to hold every valid proposal.
    pub require_unanimous: bool,
    /// Per-run voting weight overrides keyed by agent id.
    pub agent_weights: HashMap<String, f64>,
    /// Advisory: recorded on the run, a single debate pass is executed.
    pub max_debate_rounds: u32,
    /// Confidence gap above which a challenger raises a disparity challenge.
    pub confidence_disparity_threshold: f64,
    /// Per-call timeout for analysis providers.
    pub provider_timeout_ms: u64,
    /// Per-call timeout for the logic validator.
    pub validator_timeout_ms: u64,
    /// Upper bound on concurrently running phase tasks.
    pub max_concurrency: usize,
    /// Deadline for the concurrent phases of a run (0 = unlimited).
    pub debate_time_limit_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_agents_for_consensus: 3,
            consensus_threshold: 0.7,
            require_unanimous: false,
            agent_weights: HashMap::new(),
            max_debate_rounds: 1,
            confidence_disparity_threshold: 0.3,
            provider_timeout_ms: 30_000,
            validator_timeout_ms: 10_000,
            max_concurrency: 8,
            debate_time_limit_ms: 0,
        }
    }
}

impl ConsensusConfig {
    /// Parse from a TOML document; missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `DEBATE_*` environment variables; unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("DEBATE_CONSENSUS_THRESHOLD") {
            self.consensus_threshold = v;
        }
        if let Some(v) = env_parse("DEBATE_MIN_AGENTS") {
            self.min_agents_for_consensus = v;
        }
        if let Ok(v) = std::env::var("DEBATE_REQUIRE_UNANIMOUS") {
            self.require_unanimous = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_parse("DEBATE_DISPARITY_THRESHOLD") {
            self.confidence_disparity_threshold = v;
        }
        if let Some(v) = env_parse("DEBATE_PROVIDER_TIMEOUT_MS") {
            self.provider_timeout_ms = v;
        }
        if let Some(v) = env_parse("DEBATE_TIME_LIMIT_MS") {
            self.debate_time_limit_ms = v;
        }
        self
    }

    /// Check ranges and weight overrides against the registry.
    pub fn validate(&self, registry: &AgentRegistry) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.consensus_threshold));
        }
        if !(0.0..=1.0).contains(&self.confidence_disparity_threshold) {
            return Err(ConfigError::DisparityOutOfRange(
                self.confidence_disparity_threshold,
            ));
        }
        if self.min_agents_for_consensus == 0 {
            return Err(ConfigError::ZeroMinAgents);
        }
        if self.max_debate_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        for (agent_id, weight) in &self.agent_weights {
            if registry.get(agent_id).is_none() {
                return Err(ConfigError::UnknownAgent(agent_id.clone()));
            }
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(ConfigError::InvalidWeightOverride {
                    agent_id: agent_id.clone(),
                    weight: *weight,
                });
            }
        }
        Ok(())
    }

    /// Effective weight of an agent: override if present, else registry weight.
    pub fn weight_for(&self, registry: &AgentRegistry, agent_id: &str) -> f64 {
        self.agent_weights
            .get(agent_id)
            .copied()
            .or_else(|| registry.weight_of(agent_id))
            .unwrap_or(0.0)
    }

    /// Effective weights for every registered agent, in registration order.
    pub fn effective_weights(&self, registry: &AgentRegistry) -> Vec<(String, f64)> {
        registry
            .all()
            .iter()
            .map(|a| (a.id.clone(), self.weight_for(registry, &a.id)))
            .collect()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn validator_timeout(&self) -> Duration {
        Duration::from_millis(self.validator_timeout_ms)
    }

    pub fn debate_time_limit(&self) -> Option<Duration> {
        (self.debate_time_limit_ms > 0).then(|| Duration::from_millis(self.debate_time_limit_ms))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
