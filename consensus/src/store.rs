//! Debate transcripts: persisted log and outcome of finished runs.
//!
//! Serialized as versioned JSON so transcripts written by older builds can
//! still be read back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log::DebateLogEntry;
use crate::voting::ConsensusOutcome;

/// Error during store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("serialize failed: {reason}")]
    SerializeFailed { reason: String },
    #[error("deserialize failed: {reason}")]
    DeserializeFailed { reason: String },
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("invalid task id for storage: {0:?}")]
    InvalidTaskId(String),
}

/// A finished run, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTranscript {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub task_id: String,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub entries: Vec<DebateLogEntry>,
    pub outcome: ConsensusOutcome,
}

impl DebateTranscript {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(
        task_id: &str,
        run_id: Uuid,
        entries: Vec<DebateLogEntry>,
        outcome: ConsensusOutcome,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            task_id: task_id.to_string(),
            run_id,
            recorded_at: Utc::now(),
            entries,
            outcome,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let transcript: Self =
            serde_json::from_str(json).map_err(|e| StoreError::DeserializeFailed {
                reason: e.to_string(),
            })?;

        if transcript.version > Self::CURRENT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: transcript.version,
            });
        }

        Ok(transcript)
    }
}

/// History of finished runs, keyed by task id. A later run of the same task
/// replaces the earlier transcript.
pub trait DebateStore: Send + Sync {
    fn save(&self, transcript: &DebateTranscript) -> Result<(), StoreError>;

    fn load(&self, task_id: &str) -> Result<Option<DebateTranscript>, StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryDebateStore {
    transcripts: RwLock<HashMap<String, DebateTranscript>>,
}

impl InMemoryDebateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transcripts.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DebateStore for InMemoryDebateStore {
    fn save(&self, transcript: &DebateTranscript) -> Result<(), StoreError> {
        let mut guard = self
            .transcripts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(transcript.task_id.clone(), transcript.clone());
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Option<DebateTranscript>, StoreError> {
        let guard = self
            .transcripts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(task_id).cloned())
    }
}

/// One `<task_id>.json` file per task under a directory.
#[derive(Debug, Clone)]
pub struct FileDebateStore {
    dir: PathBuf,
}

impl FileDebateStore {
    /// Create the store, creating `dir` if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        let safe = !task_id.is_empty()
            && task_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !task_id.starts_with('.');
        if !safe {
            return Err(StoreError::InvalidTaskId(task_id.to_string()));
        }
        Ok(self.dir.join(format!("{task_id}.json")))
    }
}

impl DebateStore for FileDebateStore {
    fn save(&self, transcript: &DebateTranscript) -> Result<(), StoreError> {
        let path = self.path_for(&transcript.task_id)?;
        let json = transcript.to_json()?;
        // Write-then-rename so a reader never sees a half-written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn load(&self, task_id: &str) -> Result<Option<DebateTranscript>, StoreError> {
        let path = self.path_for(task_id)?;
        match std::fs::read_to_string(&path) {
            Ok(json) => DebateTranscript::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
