use std::path::Path;
use std::sync::Mutex;

use cmdseq_core::{BlockMode, CommandDictionary, RunMode, RunState, Sequence};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{StatusBus, StatusStream};
use crate::gateway::DispatchGateway;
use crate::machine::SequenceMachine;
use crate::registry::{RunRegistry, SequenceHandle};

// ─── Sequencer ────────────────────────────────────────────────────────────

/// The operator command surface.
///
/// Owns the component mode, the run registry, and the identity of the
/// current sequence (the one `START`/`STEP`/`CANCEL` address). Every method
/// returns an accept/reject result synchronously; only `run` with
/// [`BlockMode::Block`] stays suspended until the sequence is terminal.
pub struct Sequencer {
    config: EngineConfig,
    dictionary: CommandDictionary,
    gateway: DispatchGateway,
    registry: RunRegistry,
    bus: StatusBus,
    mode: Mutex<RunMode>,
    current: Mutex<Option<String>>,
}

impl Sequencer {
    pub fn new(
        gateway: DispatchGateway,
        dictionary: CommandDictionary,
        config: EngineConfig,
    ) -> Self {
        Sequencer {
            config,
            dictionary,
            gateway,
            registry: RunRegistry::new(),
            bus: StatusBus::new(),
            mode: Mutex::new(RunMode::Auto),
            current: Mutex::new(None),
        }
    }

    /// Subscribe to the status/telemetry feed.
    pub fn subscribe(&self) -> StatusStream {
        self.bus.subscribe()
    }

    pub fn dictionary(&self) -> &CommandDictionary {
        &self.dictionary
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn mode(&self) -> RunMode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run state of the current sequence, or `Idle` when none is loaded.
    pub fn state(&self) -> RunState {
        self.current_handle()
            .map(|h| h.state())
            .unwrap_or(RunState::Idle)
    }

    /// Switch the component mode. Governs the next run/start only; a
    /// sequence already in flight is unaffected.
    pub fn set_mode(&self, mode: RunMode) {
        tracing::info!(%mode, "sequencer mode set");
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Decode a sequence file without executing anything.
    ///
    /// On success the sequence is left `Loaded` and becomes the current
    /// sequence. A decode failure is a pure rejection: nothing is loaded,
    /// no state changes.
    pub async fn validate(&self, path: &Path) -> Result<SequenceHandle> {
        let name = path.display().to_string();
        if let Some(existing) = self.registry.lookup(&name) {
            if !existing.is_terminal() {
                return Err(EngineError::SequenceActive { name });
            }
        }
        let sequence = Sequence::load(path, &self.dictionary)?;
        self.install(sequence).await
    }

    /// Load (if needed) and execute a sequence according to the current
    /// mode.
    ///
    /// AUTO: execution starts immediately; `Block` suspends the caller
    /// until the returned state is terminal, `NoBlock` returns right after
    /// the start is accepted. MANUAL: the sequence is only loaded — `start`
    /// begins execution — and the block flag is irrelevant.
    pub async fn run(&self, path: &Path, block: BlockMode) -> Result<RunState> {
        let name = path.display().to_string();
        let handle = match self.registry.lookup(&name) {
            Some(h) if h.state() == RunState::Loaded => {
                self.set_current(&name);
                h
            }
            Some(h) if !h.is_terminal() => {
                return Err(EngineError::SequenceActive { name });
            }
            _ => self.validate(path).await?,
        };

        match self.mode() {
            RunMode::Manual => Ok(RunState::Loaded),
            RunMode::Auto => {
                handle.begin().await?;
                match block {
                    BlockMode::NoBlock => Ok(RunState::RunningAuto),
                    BlockMode::Block => Ok(handle.wait_terminal().await),
                }
            }
        }
    }

    /// MANUAL only: dispatch record 0 of the current loaded sequence.
    pub async fn start(&self) -> Result<()> {
        let mode = self.mode();
        if mode != RunMode::Manual {
            tracing::warn!("START rejected: sequencer is in auto mode");
            return Err(EngineError::WrongMode {
                command: "START",
                mode,
            });
        }
        let handle = self.current_handle().ok_or(EngineError::NoActiveSequence)?;
        if handle.is_terminal() {
            // The previous run was cancelled or finished; its sequence is
            // gone. A fresh run/validate is required first.
            tracing::warn!(sequence = %handle.name(), "START rejected: no sequence active");
            return Err(EngineError::NoActiveSequence);
        }
        handle.start().await
    }

    /// Advance the current sequence by one record while it waits between
    /// manual steps.
    pub async fn step(&self) -> Result<()> {
        let handle = self.current_handle().ok_or(EngineError::NoActiveSequence)?;
        handle.step().await
    }

    /// Abort the current sequence unconditionally.
    pub async fn cancel(&self) -> Result<()> {
        let handle = self.current_handle().ok_or(EngineError::NoActiveSequence)?;
        if handle.is_terminal() && handle.state() != RunState::Error {
            return Err(EngineError::ProtocolMisuse {
                command: "CANCEL",
                state: handle.state(),
            });
        }
        handle.cancel().await
    }

    /// Wait for every tracked sequence to reach a terminal state.
    ///
    /// Returns each sequence's identity and final state, in registry order.
    pub async fn joint_wait(&self) -> Vec<(String, RunState)> {
        let mut outcomes = Vec::new();
        for handle in self.registry.all() {
            let state = handle.wait_terminal().await;
            outcomes.push((handle.name().to_string(), state));
        }
        outcomes
    }

    async fn install(&self, sequence: Sequence) -> Result<SequenceHandle> {
        let name = sequence.name().to_string();
        let handle = SequenceMachine::spawn(
            sequence,
            self.mode(),
            self.gateway.clone(),
            self.config.clone(),
            self.bus.clone(),
        );
        if let Err(e) = self.registry.register(handle.clone()) {
            // Lost a race with a concurrent load of the same identity:
            // tear the fresh machine down again before reporting.
            let _ = handle.cancel().await;
            return Err(e);
        }
        self.set_current(&name);
        Ok(handle)
    }

    fn set_current(&self, name: &str) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(name.to_string());
    }

    fn current_handle(&self) -> Option<SequenceHandle> {
        let name = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        self.registry.lookup(&name)
    }
}
