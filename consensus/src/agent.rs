//! Agent registry: the fixed roster of debating agents and their voting weights.
//!
//! Agents are registered once at protocol configuration time. Re-registering an
//! id replaces its metadata in place, so registration order (which is also the
//! deterministic tie-break order) is stable across updates.

use serde::{Deserialize, Serialize};

/// Agent identifier.
pub type AgentId = String;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid voting weight {weight} for agent {agent_id}: must be finite and > 0")]
    InvalidWeight { agent_id: AgentId, weight: f64 },

    #[error("Agent id must not be empty")]
    EmptyId,
}

/// A participating agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier (also used as the debate log key).
    pub id: AgentId,
    /// Human-readable name.
    pub display_name: String,
    /// Specialty tag used to select the analysis provider.
    pub specialty: String,
    /// Voting weight, finite and strictly positive.
    pub voting_weight: f64,
}

impl Agent {
    /// Create an agent whose display name equals its id.
    pub fn new(id: &str, specialty: &str, voting_weight: f64) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            specialty: specialty.to_string(),
            voting_weight,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] w={:.2}",
            self.display_name, self.specialty, self.voting_weight
        )
    }
}

/// Ordered registry of agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any existing entry with the same id.
    ///
    /// A replaced agent keeps its original position in [`all`](Self::all).
    pub fn register(&mut self, agent: Agent) -> Result<(), RegistryError> {
        if agent.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if !agent.voting_weight.is_finite() || agent.voting_weight <= 0.0 {
            return Err(RegistryError::InvalidWeight {
                agent_id: agent.id,
                weight: agent.voting_weight,
            });
        }

        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => self.agents.push(agent),
        }
        Ok(())
    }

    /// Builder-style registration for static rosters.
    pub fn with_agent(mut self, agent: Agent) -> Result<Self, RegistryError> {
        self.register(agent)?;
        Ok(self)
    }

    /// Remove an agent. Returns the removed entry if present.
    pub fn unregister(&mut self, agent_id: &str) -> Option<Agent> {
        let idx = self.agents.iter().position(|a| a.id == agent_id)?;
        Some(self.agents.remove(idx))
    }

    /// Voting weight of an agent.
    pub fn weight_of(&self, agent_id: &str) -> Option<f64> {
        self.get(agent_id).map(|a| a.voting_weight)
    }

    pub fn get(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    /// All agents in registration order.
    pub fn all(&self) -> &[Agent] {
        &self.agents
    }

    /// Position of an agent in registration order.
    pub fn position(&self, agent_id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id == agent_id)
    }

    /// Sum of all registered voting weights, recomputed on every call.
    pub fn total_weight(&self) -> f64 {
        self.agents.iter().map(|a| a.voting_weight).sum()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
