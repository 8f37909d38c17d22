//! Persistent session state.
//!
//! The store survives coordinator restarts and is the only place recording
//! state lives. Writers publish a [`StoreChange`] per key that changed so live
//! recorders can follow the mutation toggle without being re-injected.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use wfrec_common::state::SessionState;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse state file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Recording(bool),
    RecordMutations(bool),
}

/// Diffs two states into change notifications.
pub fn changes_between(old: &SessionState, new: &SessionState) -> Vec<StoreChange> {
    let mut changes = Vec::new();
    if old.is_recording != new.is_recording {
        changes.push(StoreChange::Recording(new.is_recording));
    }
    if old.record_mutations_enabled != new.record_mutations_enabled {
        changes.push(StoreChange::RecordMutations(new.record_mutations_enabled));
    }
    changes
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<SessionState, StoreError>;

    async fn save(&self, state: &SessionState) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

fn publish(tx: &broadcast::Sender<StoreChange>, old: &SessionState, new: &SessionState) {
    for change in changes_between(old, new) {
        // No subscribers is fine.
        let _ = tx.send(change);
    }
}

/// Volatile store for tests and one-shot runs.
pub struct MemoryStore {
    state: Mutex<SessionState>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_state(SessionState::default())
    }

    pub fn with_state(state: SessionState) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(state),
            changes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<SessionState, StoreError> {
        Ok(self.lock().clone())
    }

    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let old = std::mem::replace(&mut *self.lock(), state.clone());
        publish(&self.changes, &old, state);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// JSON file store. Writes go to a sibling temp file and are renamed into
/// place so a crash never leaves a truncated state file.
pub struct JsonFileStore {
    path: PathBuf,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<SessionState, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(SessionState::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionState::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<SessionState, StoreError> {
        self.read().await
    }

    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let old = self.read().await.unwrap_or_default();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        publish(&self.changes, &old, state);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
