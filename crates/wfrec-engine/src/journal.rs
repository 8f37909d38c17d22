//! Single writer in front of the state store.
//!
//! Every read-modify-write of the session goes through one task, one operation
//! at a time, so concurrent `logStep` requests can never overwrite each
//! other's appends and a `stop` always sees every append queued before it.
//! Each operation re-reads the store; nothing is cached between operations.

use crate::store::{StateStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};
use wfrec_common::protocol::{Settings, Step};
use wfrec_common::state::SessionState;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Session journal is no longer running")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of trying to open a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begin {
    AlreadyRecording,
    Started(Settings),
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Op {
    Begin(Reply<Begin>),
    Rollback(Reply<()>),
    Append(Step, Option<Reply<bool>>),
    Finish(Reply<Option<Vec<Step>>>),
    SetRecordMutations(bool, Reply<()>),
    Snapshot(Reply<SessionState>),
}

#[derive(Clone)]
pub struct Journal {
    tx: mpsc::UnboundedSender<Op>,
}

impl Journal {
    /// Spawns the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn StateStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, rx));
        Self { tx }
    }

    async fn call<T>(&self, op: impl FnOnce(Reply<T>) -> Op) -> Result<T, JournalError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(op(reply)).map_err(|_| JournalError::Closed)?;
        Ok(rx.await.map_err(|_| JournalError::Closed)??)
    }

    /// Opens a session with an empty log unless one is already open.
    pub async fn begin(&self) -> Result<Begin, JournalError> {
        self.call(Op::Begin).await
    }

    /// Resets the session after a failed start.
    pub async fn rollback(&self) -> Result<(), JournalError> {
        self.call(Op::Rollback).await
    }

    /// Queues a step without waiting for it to be written.
    pub fn append(&self, step: Step) -> Result<(), JournalError> {
        self.tx
            .send(Op::Append(step, None))
            .map_err(|_| JournalError::Closed)
    }

    /// Appends a step and reports whether it was kept.
    pub async fn append_confirmed(&self, step: Step) -> Result<bool, JournalError> {
        self.call(|reply| Op::Append(step, Some(reply))).await
    }

    /// Closes the session, returning its steps, or `None` when not recording.
    pub async fn finish(&self) -> Result<Option<Vec<Step>>, JournalError> {
        self.call(Op::Finish).await
    }

    pub async fn set_record_mutations(&self, enabled: bool) -> Result<(), JournalError> {
        self.call(|reply| Op::SetRecordMutations(enabled, reply))
            .await
    }

    /// Reads the state after every previously queued operation has been applied.
    pub async fn snapshot(&self) -> Result<SessionState, JournalError> {
        self.call(Op::Snapshot).await
    }
}

async fn run(store: Arc<dyn StateStore>, mut rx: mpsc::UnboundedReceiver<Op>) {
    while let Some(op) = rx.recv().await {
        match op {
            Op::Begin(reply) => {
                let _ = reply.send(begin(&*store).await);
            }
            Op::Rollback(reply) => {
                let _ = reply.send(rollback(&*store).await);
            }
            Op::Append(step, reply) => {
                let result = append(&*store, step).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            error!("Failed to append step: {}", e);
                        }
                    }
                }
            }
            Op::Finish(reply) => {
                let _ = reply.send(finish(&*store).await);
            }
            Op::SetRecordMutations(enabled, reply) => {
                let _ = reply.send(set_record_mutations(&*store, enabled).await);
            }
            Op::Snapshot(reply) => {
                let _ = reply.send(store.load().await);
            }
        }
    }
    debug!("Session journal stopped");
}

async fn begin(store: &dyn StateStore) -> Result<Begin, StoreError> {
    let mut state = store.load().await?;
    if state.is_recording {
        return Ok(Begin::AlreadyRecording);
    }
    state.is_recording = true;
    state.recorded_steps.clear();
    store.save(&state).await?;
    Ok(Begin::Started(state.settings()))
}

async fn rollback(store: &dyn StateStore) -> Result<(), StoreError> {
    let mut state = store.load().await?;
    state.reset_session();
    store.save(&state).await
}

async fn set_record_mutations(store: &dyn StateStore, enabled: bool) -> Result<(), StoreError> {
    let mut state = store.load().await?;
    state.record_mutations_enabled = enabled;
    store.save(&state).await
}

async fn append(store: &dyn StateStore, mut step: Step) -> Result<bool, StoreError> {
    let mut state = store.load().await?;
    if !state.is_recording {
        debug!(kind = step.step_type(), "Not recording; step dropped");
        return Ok(false);
    }
    step.step = state.recorded_steps.len() as u64 + 1;
    debug!(step = step.step, kind = step.step_type(), "Step logged");
    state.recorded_steps.push(step);
    store.save(&state).await?;
    Ok(true)
}

async fn finish(store: &dyn StateStore) -> Result<Option<Vec<Step>>, StoreError> {
    let mut state = store.load().await?;
    if !state.is_recording {
        return Ok(None);
    }
    let steps = std::mem::take(&mut state.recorded_steps);
    state.reset_session();
    store.save(&state).await?;
    Ok(Some(steps))
}
