//! Scripted debate scenarios for the `debate-runner` binary.
//!
//! A scenario is a TOML file naming the task, the agents and, per agent, the
//! analysis its provider returns (or a failure / delay). Useful for exercising
//! the protocol without any model backend.
//!
//! ```toml
//! [task]
//! id = "lease-default"
//! description = "Tenant is 95 days in arrears"
//! data = { arrears_days = 95 }
//!
//! [[agents]]
//! id = "finance"
//! weight = 1.2
//! [agents.analysis]
//! text = "notify lender"
//! confidence = 0.9
//! ```

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use consensus::{
    Agent, AgentRegistry, Analysis, AnalysisProvider, CollaboratorError, ConsensusConfig,
    ConsensusProtocol, DebateRun, Evidence, LogicValidator, OpposingStance, OverlapClassifier,
    ProviderError, ProviderSet, SimilarityClassifier, TaskData,
};

/// Top-level scenario document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub task: ScenarioTask,
    pub agents: Vec<ScenarioAgent>,
    /// Protocol settings; missing fields take their defaults.
    #[serde(default)]
    pub config: Option<ConsensusConfig>,
    #[serde(default)]
    pub similarity: Option<SimilaritySettings>,
    #[serde(default)]
    pub validator: Option<ValidatorSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub data: TaskData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAgent {
    pub id: String,
    /// Defaults to the agent id.
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub analysis: ScriptedAnalysis,
}

fn default_weight() -> f64 {
    1.0
}

/// What the agent's provider does when called.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedAnalysis {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Return a provider error instead of an analysis.
    #[serde(default)]
    pub fail: bool,
    /// Sleep before answering.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilaritySettings {
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f64,
    /// Replaces the built-in stance table when present.
    #[serde(default)]
    pub stances: Option<Vec<OpposingStance>>,
}

fn default_similarity_threshold() -> f64 {
    consensus::similarity::DEFAULT_SIMILARITY_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSettings {
    /// Fail conclusions that carry no evidence.
    #[serde(default)]
    pub require_evidence: bool,
}

impl Scenario {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(input).context("Failed to parse scenario")?;
        if scenario.agents.is_empty() {
            anyhow::bail!("scenario {} declares no agents", scenario.task.id);
        }
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    /// Scenario config, or defaults.
    pub fn consensus_config(&self) -> ConsensusConfig {
        self.config.clone().unwrap_or_default()
    }
}

/// Provider that replays a scripted analysis.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    script: ScriptedAnalysis,
}

impl ScriptedProvider {
    pub fn new(script: ScriptedAnalysis) -> Self {
        Self { script }
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    async fn generate_proposal(
        &self,
        _task_description: &str,
        _task_data: &TaskData,
    ) -> Result<Analysis, ProviderError> {
        if self.script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.delay_ms)).await;
        }
        if self.script.fail {
            return Err(ProviderError::RequestFailed(
                "scripted provider failure".to_string(),
            ));
        }
        Ok(Analysis {
            text: self.script.text.clone(),
            evidence: self.script.evidence.clone(),
            confidence: self.script.confidence,
        })
    }
}

/// Passes a conclusion iff it carries evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceValidator;

#[async_trait]
impl LogicValidator for EvidenceValidator {
    async fn validate(
        &self,
        _conclusion: &str,
        evidence: &[Evidence],
    ) -> Result<bool, CollaboratorError> {
        Ok(!evidence.is_empty())
    }
}

/// Build the protocol a scenario describes.
pub fn build_protocol(scenario: &Scenario) -> Result<ConsensusProtocol> {
    let mut registry = AgentRegistry::new();
    let mut providers = ProviderSet::new();

    for spec in &scenario.agents {
        let specialty = spec.specialty.as_deref().unwrap_or(&spec.id);
        if providers.contains(specialty) {
            anyhow::bail!(
                "specialty {} is scripted twice (agent {}); give each agent its own specialty",
                specialty,
                spec.id
            );
        }
        let mut agent = Agent::new(&spec.id, specialty, spec.weight);
        if let Some(name) = &spec.display_name {
            agent = agent.with_display_name(name);
        }
        registry
            .register(agent)
            .with_context(|| format!("Failed to register agent {}", spec.id))?;
        providers.insert(specialty, Arc::new(ScriptedProvider::new(spec.analysis.clone())));
    }

    let classifier = match &scenario.similarity {
        Some(settings) => {
            let base = OverlapClassifier::new(settings.threshold);
            match &settings.stances {
                Some(stances) => base.with_stances(stances.clone()),
                None => base,
            }
        }
        None => OverlapClassifier::default(),
    };
    classifier
        .validate()
        .context("Invalid [similarity] settings")?;

    let mut protocol = ConsensusProtocol::new(registry, providers, Arc::new(classifier));
    if scenario
        .validator
        .as_ref()
        .is_some_and(|v| v.require_evidence)
    {
        protocol = protocol.with_validator(Arc::new(EvidenceValidator));
    }
    Ok(protocol)
}

/// Human-readable report of a finished run.
pub fn render_text(run: &DebateRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", run.summary_line());
    if let Some(text) = &run.outcome.winning_text {
        let _ = writeln!(out, "winning: {}", text);
    }
    if !run.outcome.leading_agent_ids.is_empty() {
        let _ = writeln!(out, "leading: {}", run.outcome.leading_agent_ids.join(", "));
    }
    if run.deadline_exceeded {
        let _ = writeln!(out, "note: debate time limit reached");
    }
    if run.cancelled {
        let _ = writeln!(out, "note: run cancelled");
    }

    let _ = writeln!(out, "\ntranscript:");
    for entry in &run.entries {
        let _ = writeln!(out, "  {}", entry);
    }

    if !run.outcome.dissent_records.is_empty() {
        let _ = writeln!(out, "\ndissent:");
        for record in &run.outcome.dissent_records {
            let _ = writeln!(
                out,
                "  {} ({:.2}): {} [{}]",
                record.agent_id, record.confidence, record.alternative_text, record.reason
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
[task]
id = "lease-default"
description = "Tenant is 95 days in arrears"
data = { arrears_days = 95 }

[[agents]]
id = "finance"
weight = 1.2
[agents.analysis]
text = "notify lender"
confidence = 0.9
evidence = [{ fact = "arrears_days", value = "95", confidence = 1.0 }]

[[agents]]
id = "legal"
specialty = "law"
[agents.analysis]
fail = true
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        assert_eq!(scenario.task.id, "lease-default");
        assert_eq!(scenario.task.data["arrears_days"], 95);
        assert_eq!(scenario.agents.len(), 2);
        assert_eq!(scenario.agents[1].weight, 1.0);
        assert!(scenario.agents[1].analysis.fail);
        assert_eq!(scenario.agents[0].analysis.evidence.len(), 1);
        assert_eq!(scenario.consensus_config(), ConsensusConfig::default());
    }

    #[test]
    fn test_build_protocol_maps_specialties() {
        let scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        let protocol = build_protocol(&scenario).unwrap();
        assert_eq!(protocol.registry().len(), 2);
        assert_eq!(protocol.registry().get("legal").unwrap().specialty, "law");
    }

    #[test]
    fn test_duplicate_specialty_rejected() {
        let doubled = format!(
            "{SCENARIO}\n[[agents]]\nid = \"other\"\nspecialty = \"law\"\n[agents.analysis]\ntext = \"x\"\n"
        );
        let scenario = Scenario::from_toml_str(&doubled).unwrap();
        assert!(build_protocol(&scenario).is_err());
    }

    #[test]
    fn test_out_of_range_similarity_threshold_rejected() {
        let scenario =
            Scenario::from_toml_str(&format!("{SCENARIO}\n[similarity]\nthreshold = 1.5\n"))
                .unwrap();
        let err = build_protocol(&scenario).unwrap_err();
        assert!(err.to_string().contains("[similarity]"));
        assert!(format!("{err:#}").contains("1.5"));
    }

    #[test]
    fn test_no_agents_rejected() {
        let err = Scenario::from_toml_str("agents = []\n[task]\nid = \"t\"\ndescription = \"d\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("no agents"));
    }

    #[tokio::test]
    async fn test_scripted_failure_is_provider_error() {
        let provider = ScriptedProvider::new(ScriptedAnalysis {
            fail: true,
            ..Default::default()
        });
        let result = provider
            .generate_proposal("task", &TaskData::Null)
            .await;
        assert!(matches!(result, Err(ProviderError::RequestFailed(_))));
    }
}
