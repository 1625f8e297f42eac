use std::collections::HashMap;
use std::sync::Mutex;

use cmdseq_core::RunState;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{EngineError, Result};
use crate::machine::MachineCommand;

// ─── SequenceHandle ───────────────────────────────────────────────────────

/// A cheap, cloneable reference to one sequence's state machine task.
///
/// Carries the command channel plus two watches: the current run state and
/// a terminal flag. The handle outlives the task, so a finished sequence
/// can still be queried for its final state.
#[derive(Debug, Clone)]
pub struct SequenceHandle {
    name: String,
    commands: mpsc::Sender<MachineCommand>,
    state: watch::Receiver<RunState>,
    terminal: watch::Receiver<bool>,
}

impl SequenceHandle {
    pub(crate) fn new(
        name: String,
        commands: mpsc::Sender<MachineCommand>,
        state: watch::Receiver<RunState>,
        terminal: watch::Receiver<bool>,
    ) -> Self {
        SequenceHandle {
            name,
            commands,
            state,
            terminal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        *self.terminal.borrow()
    }

    /// Wait until the sequence reaches a terminal state, then return it.
    pub async fn wait_terminal(&self) -> RunState {
        let mut terminal = self.terminal.clone();
        // If the machine task is already gone the last observed state is
        // still the answer.
        let _ = terminal.wait_for(|done| *done).await;
        self.state()
    }

    pub(crate) async fn begin(&self) -> Result<()> {
        self.command("RUN", |reply| MachineCommand::Begin { reply })
            .await
    }

    pub(crate) async fn start(&self) -> Result<()> {
        self.command("START", |reply| MachineCommand::Start { reply })
            .await
    }

    pub(crate) async fn step(&self) -> Result<()> {
        self.command("STEP", |reply| MachineCommand::Step { reply })
            .await
    }

    pub(crate) async fn cancel(&self) -> Result<()> {
        self.command("CANCEL", |reply| MachineCommand::Cancel { reply })
            .await
    }

    async fn command(
        &self,
        name: &'static str,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> MachineCommand,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(make(tx)).await.is_err() {
            // Machine task already exited: the sequence is finished and
            // freed, so the command has nothing to act on.
            return Err(EngineError::ProtocolMisuse {
                command: name,
                state: self.state(),
            });
        }
        rx.await.map_err(|_| EngineError::EngineShutdown)?
    }
}

// ─── RunRegistry ──────────────────────────────────────────────────────────

/// Identity-keyed map of concurrently loaded sequences.
///
/// The only cross-sequence state in the engine. The lock guards map
/// operations exclusively and is never held across an await.
#[derive(Default)]
pub struct RunRegistry {
    inner: Mutex<HashMap<String, SequenceHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle under its sequence identity.
    ///
    /// A terminal previous occupant is replaced; an active one is an error —
    /// two live sequences may never share an identity.
    pub fn register(&self, handle: SequenceHandle) -> Result<()> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = map.get(handle.name()) {
            if !existing.is_terminal() {
                return Err(EngineError::SequenceActive {
                    name: handle.name().to_string(),
                });
            }
        }
        map.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<SequenceHandle> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn all(&self) -> Vec<SequenceHandle> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn remove(&self, name: &str) -> Option<SequenceHandle> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
