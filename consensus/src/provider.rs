//! External collaborators: analysis providers and the logic validator.
//!
//! Providers are keyed by specialty tag, so the protocol never branches on a
//! specialty itself: an agent's proposal comes from whichever provider is
//! registered for its tag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::proposal::{Analysis, Evidence};

/// Arbitrary structured task payload handed to providers untouched.
pub type TaskData = Value;

/// Errors from an analysis provider call
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Provider response invalid: {0}")]
    InvalidResponse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the similarity classifier or logic validator
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator failed: {0}")]
    Failed(String),

    #[error("Collaborator misconfigured: {0}")]
    Misconfigured(String),

    #[error("Collaborator timed out after {0}ms")]
    TimedOut(u64),
}

/// Produces a proposal for one specialty.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyse the task and return a conclusion with evidence and confidence.
    async fn generate_proposal(
        &self,
        task_description: &str,
        task_data: &TaskData,
    ) -> Result<Analysis, ProviderError>;
}

/// Checks whether a conclusion follows from its evidence.
#[async_trait]
pub trait LogicValidator: Send + Sync {
    async fn validate(
        &self,
        conclusion: &str,
        evidence: &[Evidence],
    ) -> Result<bool, CollaboratorError>;
}

/// Analysis providers keyed by specialty tag.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn AnalysisProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the provider for a specialty.
    pub fn insert(&mut self, specialty: &str, provider: Arc<dyn AnalysisProvider>) {
        self.providers.insert(specialty.to_string(), provider);
    }

    pub fn with(mut self, specialty: &str, provider: Arc<dyn AnalysisProvider>) -> Self {
        self.insert(specialty, provider);
        self
    }

    pub fn get(&self, specialty: &str) -> Option<Arc<dyn AnalysisProvider>> {
        self.providers.get(specialty).cloned()
    }

    pub fn contains(&self, specialty: &str) -> bool {
        self.providers.contains_key(specialty)
    }

    pub fn specialties(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("specialties", &self.specialties())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl AnalysisProvider for Fixed {
        async fn generate_proposal(
            &self,
            _task_description: &str,
            _task_data: &TaskData,
        ) -> Result<Analysis, ProviderError> {
            Ok(Analysis::new("fixed", 0.5))
        }
    }

    #[tokio::test]
    async fn test_provider_set_lookup() {
        let set = ProviderSet::new()
            .with("legal", Arc::new(Fixed))
            .with("finance", Arc::new(Fixed));

        assert_eq!(set.specialties(), vec!["finance", "legal"]);
        assert!(set.contains("legal"));
        assert!(set.get("risk").is_none());

        let provider = set.get("legal").unwrap();
        let analysis = provider
            .generate_proposal("task", &Value::Null)
            .await
            .unwrap();
        assert_eq!(analysis.text, "fixed");
    }

    #[test]
    fn test_error_display() {
        let err = CollaboratorError::TimedOut(250);
        assert_eq!(err.to_string(), "Collaborator timed out after 250ms");
    }
}
