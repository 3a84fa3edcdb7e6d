//! Debate log: append-only, ordered record of a protocol run.
//!
//! Workers from the concurrent phases append through a shared handle. Appends
//! are serialized under one lock so the sequence number, the stored order and
//! the broadcast order always agree. Subscribers get entries live through a
//! Tokio broadcast channel; the stored entries remain the source of truth.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::agent::AgentId;

/// Channel capacity for live subscribers
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to DebateLog
pub type SharedDebateLog = Arc<DebateLog>;

/// Protocol phase an entry was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStage {
    Proposal,
    Challenge,
    Resolution,
    Consensus,
}

impl std::fmt::Display for DebateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposal => write!(f, "proposal"),
            Self::Challenge => write!(f, "challenge"),
            Self::Resolution => write!(f, "resolution"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

/// One entry in the debate log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateLogEntry {
    /// Wall-clock append time.
    pub timestamp: DateTime<Utc>,
    /// Monotonic append index within the run, starting at 0.
    pub sequence: u64,
    /// Stage that produced the entry.
    pub phase: DebateStage,
    /// Agent the entry concerns; `None` for the consensus summary.
    pub agent_id: Option<AgentId>,
    /// One-line, human-readable description.
    pub summary: String,
}

impl std::fmt::Display for DebateLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{:03} {} [{}] {}: {}",
            self.sequence,
            self.timestamp.format("%H:%M:%S%.3f"),
            self.phase,
            self.agent_id.as_deref().unwrap_or("-"),
            self.summary
        )
    }
}

/// Append-only log for a single run.
pub struct DebateLog {
    task_id: String,
    entries: Mutex<Vec<DebateLogEntry>>,
    sender: broadcast::Sender<DebateLogEntry>,
}

impl DebateLog {
    pub fn new(task_id: &str) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            task_id: task_id.to_string(),
            entries: Mutex::new(Vec::new()),
            sender,
        }
    }

    pub fn shared(self) -> SharedDebateLog {
        Arc::new(self)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Append an entry and broadcast it to subscribers.
    pub fn append(&self, phase: DebateStage, agent_id: Option<&str>, summary: impl Into<String>) {
        let mut entries = self.lock();
        let entry = DebateLogEntry {
            timestamp: Utc::now(),
            sequence: entries.len() as u64,
            phase,
            agent_id: agent_id.map(str::to_string),
            summary: summary.into(),
        };
        debug!(
            task_id = %self.task_id,
            sequence = entry.sequence,
            phase = %phase,
            agent_id = entry.agent_id.as_deref().unwrap_or("-"),
            "debate log append"
        );
        entries.push(entry.clone());
        // No receivers is fine: the stored entries are authoritative.
        let _ = self.sender.send(entry);
    }

    /// Receive entries as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<DebateLogEntry> {
        self.sender.subscribe()
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<DebateLogEntry> {
        self.lock().clone()
    }

    /// Entries written during one phase.
    pub fn entries_for(&self, phase: DebateStage) -> Vec<DebateLogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.phase == phase)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DebateLogEntry>> {
        // A panicking appender cannot leave a half-written entry behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for DebateLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateLog")
            .field("task_id", &self.task_id)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_sequence() {
        let log = DebateLog::new("task-1");
        log.append(DebateStage::Proposal, Some("a"), "first");
        log.append(DebateStage::Proposal, Some("b"), "second");
        log.append(DebateStage::Consensus, None, "done");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(entries[2].agent_id.is_none());
        assert_eq!(log.entries_for(DebateStage::Proposal).len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_receive_entries() {
        let log = DebateLog::new("task-1");
        let mut rx = log.subscribe();
        log.append(DebateStage::Challenge, Some("a"), "contradiction");

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.phase, DebateStage::Challenge);
        assert_eq!(entry.summary, "contradiction");
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_ordered() {
        let log = DebateLog::new("task-1").shared();
        let mut handles = Vec::new();
        for i in 0..16 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(DebateStage::Proposal, Some(&format!("agent-{}", i)), "p");
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 16);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence, i as u64);
        }
    }

    #[test]
    fn test_entry_display() {
        let log = DebateLog::new("t");
        log.append(DebateStage::Resolution, Some("risk"), "valid");
        let line = log.entries()[0].to_string();
        assert!(line.contains("[resolution] risk: valid"));
    }
}
