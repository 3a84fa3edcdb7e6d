//! Multi-agent debate and weighted consensus.
//!
//! A fixed roster of specialist agents analyzes one task concurrently, the
//! agents challenge each other's proposals, challenges are resolved into
//! adjusted confidences, and a weighted vote over similarity classes picks the
//! outcome or records structured dissent.
//!
//! # Phases
//!
//! - **Proposal**: one `AnalysisProvider` call per agent, bounded fan-out,
//!   failures and timeouts become zero-confidence fallback proposals
//! - **Challenge**: optional logic validation, then contradiction, confidence
//!   disparity and methodology tests over ordered peer pairs
//! - **Resolution**: deterministic confidence adjustment and invalidation
//! - **Consensus**: similarity grouping, weighted support, method assignment
//!
//! Every phase appends to a per-run [`DebateLog`]; finished runs are kept in a
//! [`DebateStore`].
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use consensus::*;
//! # async fn demo(provider: Arc<dyn AnalysisProvider>) -> Result<(), ProtocolError> {
//! let registry = AgentRegistry::new()
//!     .with_agent(Agent::new("finance", "finance", 1.2))?
//!     .with_agent(Agent::new("legal", "legal", 1.3))?
//!     .with_agent(Agent::new("risk", "risk", 1.0))?;
//! let providers = ProviderSet::new()
//!     .with("finance", provider.clone())
//!     .with("legal", provider.clone())
//!     .with("risk", provider);
//!
//! let protocol = ConsensusProtocol::new(
//!     registry,
//!     providers,
//!     Arc::new(OverlapClassifier::default()),
//! );
//! let outcome = protocol
//!     .run_consensus("task-1", "Assess lease default", &serde_json::json!({}), &ConsensusConfig::from_env())
//!     .await?;
//! println!("{}", outcome.summary_line());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod challenge;
pub mod collector;
pub mod config;
pub mod log;
pub mod proposal;
pub mod protocol;
pub mod provider;
pub mod resolution;
pub mod similarity;
pub mod state;
pub mod store;
pub mod voting;

pub use agent::{Agent, AgentId, AgentRegistry, RegistryError};
pub use challenge::{
    Challenge, ChallengeEvaluator, ChallengeKind, ChallengeRound, ValidationMap,
    ValidationVerdict,
};
pub use collector::ProposalCollector;
pub use config::{ConfigError, ConsensusConfig};
pub use log::{DebateLog, DebateLogEntry, DebateStage, SharedDebateLog};
pub use proposal::{Analysis, Evidence, Proposal, FALLBACK_TEXT};
pub use protocol::{ConsensusProtocol, DebateRun, ProtocolError};
pub use provider::{
    AnalysisProvider, CollaboratorError, LogicValidator, ProviderError, ProviderSet, TaskData,
};
pub use resolution::{Resolution, ResolutionEngine, ResolutionMap};
pub use similarity::{OpposingStance, OverlapClassifier, SimilarityClassifier};
pub use state::{ProtocolPhase, RunState, TransitionError};
pub use store::{DebateStore, DebateTranscript, FileDebateStore, InMemoryDebateStore, StoreError};
pub use voting::{
    ConsensusCalculator, ConsensusClass, ConsensusMethod, ConsensusOutcome, DissentRecord,
    WeightTable,
};
