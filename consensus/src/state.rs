//! Protocol state machine: phases, transitions, and run tracking.
//!
//! ```text
//! Idle → Proposal → Challenge → Resolution → Consensus ─┬─ ConsensusReached
//!                                                       └─ DissentRecorded
//! ```
//!
//! Each arrow is a full barrier: the next phase starts only after every task
//! of the previous one has finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolPhase {
    /// Run created, nothing collected yet.
    Idle,
    /// Collecting proposals from providers.
    Proposal,
    /// Peers challenging each other's proposals.
    Challenge,
    /// Applying challenges to confidence and validity.
    Resolution,
    /// Weighted vote over resolved proposals.
    Consensus,
    /// Consensus achieved.
    ConsensusReached,
    /// No consensus; dissent recorded.
    DissentRecorded,
}

impl ProtocolPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ConsensusReached | Self::DissentRecorded)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [ProtocolPhase] {
        match self {
            Self::Idle => &[Self::Proposal],
            Self::Proposal => &[Self::Challenge],
            Self::Challenge => &[Self::Resolution],
            Self::Resolution => &[Self::Consensus],
            Self::Consensus => &[Self::ConsensusReached, Self::DissentRecorded],
            Self::ConsensusReached | Self::DissentRecorded => &[],
        }
    }
}

impl std::fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Proposal => write!(f, "proposal"),
            Self::Challenge => write!(f, "challenge"),
            Self::Resolution => write!(f, "resolution"),
            Self::Consensus => write!(f, "consensus"),
            Self::ConsensusReached => write!(f, "consensus_reached"),
            Self::DissentRecorded => write!(f, "dissent_recorded"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ProtocolPhase,
    pub to: ProtocolPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} → {to}")]
pub struct TransitionError {
    pub from: ProtocolPhase,
    pub to: ProtocolPhase,
}

/// Tracks the current phase and transition history of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub phase: ProtocolPhase,
    pub transitions: Vec<PhaseTransition>,
    pub started_at: DateTime<Utc>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: ProtocolPhase::Idle,
            transitions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Move to `to`, recording why.
    pub fn transition(&mut self, to: ProtocolPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Phases visited, in order, starting from `Idle`.
    pub fn path(&self) -> Vec<ProtocolPhase> {
        std::iter::once(ProtocolPhase::Idle)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }
}
