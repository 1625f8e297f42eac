use cmdseq_core::{RunMode, RunState, Sequence, StatusEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::StatusBus;
use crate::gateway::{DispatchGateway, DispatchOutcome, DispatchResult, PendingDispatch};
use crate::registry::SequenceHandle;
use crate::scheduler;

// ─── MachineCommand ───────────────────────────────────────────────────────

/// Operator commands forwarded to a sequence's state machine task.
///
/// Every command is answered on its reply channel as soon as it is accepted
/// or rejected; execution outcomes are observed via status events, never by
/// holding the reply open.
#[derive(Debug)]
pub(crate) enum MachineCommand {
    /// Begin autonomous (AUTO) execution of a loaded sequence.
    Begin { reply: oneshot::Sender<Result<()>> },
    /// Begin operator-paced (MANUAL) execution: record 0 only.
    Start { reply: oneshot::Sender<Result<()>> },
    /// Advance one record while paused between records.
    Step { reply: oneshot::Sender<Result<()>> },
    /// Abort unconditionally.
    Cancel { reply: oneshot::Sender<Result<()>> },
}

// ─── SequenceMachine ──────────────────────────────────────────────────────

/// The per-sequence execution state machine.
///
/// One spawned task exclusively owns the loaded [`Sequence`] and its run
/// state. Three event sources are serialized through the task's `select!`
/// loop: operator commands, the pending dispatch's result, and a periodic
/// scheduler tick that polls for due records. Records are dispatched in
/// strictly increasing index order, and record N+1 is never dispatched
/// before record N's result has been observed.
pub(crate) struct SequenceMachine {
    sequence: Sequence,
    mode: RunMode,
    state: RunState,
    /// Index of the next record to dispatch.
    next: u32,
    auto: bool,
    error: Option<String>,
    sequence_start: Option<Instant>,
    last_completion: Option<Instant>,
    deadline: Option<Instant>,
    pending: Option<PendingDispatch>,

    config: EngineConfig,
    gateway: DispatchGateway,
    bus: StatusBus,
    commands: mpsc::Receiver<MachineCommand>,
    state_tx: watch::Sender<RunState>,
    terminal_tx: watch::Sender<bool>,
}

impl SequenceMachine {
    /// Spawn the state machine for a freshly decoded sequence.
    ///
    /// The machine starts in `Loaded` and emits that transition before the
    /// task is spawned, so a subscriber always sees the load first.
    pub(crate) fn spawn(
        sequence: Sequence,
        mode: RunMode,
        gateway: DispatchGateway,
        config: EngineConfig,
        bus: StatusBus,
    ) -> SequenceHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (state_tx, state_rx) = watch::channel(RunState::Loaded);
        let (terminal_tx, terminal_rx) = watch::channel(false);

        let name = sequence.name().to_string();
        let machine = SequenceMachine {
            sequence,
            mode,
            state: RunState::Loaded,
            next: 0,
            auto: false,
            error: None,
            sequence_start: None,
            last_completion: None,
            deadline: None,
            pending: None,
            config,
            gateway,
            bus,
            commands: cmd_rx,
            state_tx,
            terminal_tx,
        };
        machine.emit();
        tracing::info!(sequence = %name, records = machine.sequence.len(), "sequence loaded");
        tokio::spawn(machine.run());

        SequenceHandle::new(name, cmd_tx, state_rx, terminal_rx)
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.tick());
        loop {
            tokio::select! {
                // Operator commands win ties so a cancel is applied before
                // a dispatch result queued in the same tick.
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },

                result = Self::await_result(self.pending.as_mut()) => {
                    self.pending = None;
                    if self.handle_result(result).await {
                        break;
                    }
                }

                _ = tick.tick() => {
                    if self.poll_due().await {
                        break;
                    }
                }
            }
        }
        // The handle stays queryable after the task ends; make sure nobody
        // waits forever on a machine that exited while shutting down.
        self.terminal_tx.send_replace(true);
    }

    async fn await_result(pending: Option<&mut PendingDispatch>) -> DispatchResult {
        match pending {
            Some(p) => p.wait().await,
            None => futures::future::pending().await,
        }
    }

    /// Returns `true` when the task should exit.
    async fn handle_command(&mut self, cmd: MachineCommand) -> bool {
        match cmd {
            MachineCommand::Begin { reply } => {
                if self.state != RunState::Loaded {
                    let _ = reply.send(Err(self.misuse("RUN")));
                    return false;
                }
                self.auto = true;
                self.mode = RunMode::Auto;
                self.arm_first();
                self.transition(RunState::RunningAuto);
                let _ = reply.send(Ok(()));
                self.poll_due().await
            }
            MachineCommand::Start { reply } => {
                if self.state != RunState::Loaded {
                    let _ = reply.send(Err(self.misuse("START")));
                    return false;
                }
                self.auto = false;
                self.mode = RunMode::Manual;
                self.arm_first();
                self.transition(RunState::RunningManual);
                let _ = reply.send(Ok(()));
                self.poll_due().await
            }
            MachineCommand::Step { reply } => {
                if self.state != RunState::WaitingStep {
                    let _ = reply.send(Err(self.misuse("STEP")));
                    return false;
                }
                // STEP removes the autonomy, not the timing: the record is
                // dispatched when its own deadline arrives.
                self.arm_next();
                self.transition(RunState::RunningManual);
                let _ = reply.send(Ok(()));
                self.poll_due().await
            }
            MachineCommand::Cancel { reply } => {
                // Error is terminal but still cancellable: the cancel is
                // what releases the loaded sequence.
                self.pending = None;
                self.deadline = None;
                self.transition(RunState::Cancelled);
                let _ = reply.send(Ok(()));
                true
            }
        }
    }

    /// Returns `true` when the task should exit.
    async fn handle_result(&mut self, result: DispatchResult) -> bool {
        match result.outcome {
            DispatchOutcome::Success => {
                self.last_completion = Some(Instant::now());
                self.next = result.record_index + 1;
                if self.next >= self.sequence.len() {
                    self.transition(RunState::Complete);
                    return true;
                }
                if self.auto {
                    self.arm_next();
                    // Same state, new cursor: still worth a status event.
                    self.emit();
                    self.poll_due().await
                } else {
                    self.transition(RunState::WaitingStep);
                    false
                }
            }
            DispatchOutcome::Failure(reason) => {
                tracing::error!(
                    sequence = %self.sequence.name(),
                    record = result.record_index,
                    %reason,
                    "dispatch failed"
                );
                // Park the cursor on the record that faulted.
                self.next = result.record_index + 1;
                self.fault("dispatch_failed")
            }
            DispatchOutcome::Timeout => {
                tracing::error!(
                    sequence = %self.sequence.name(),
                    record = result.record_index,
                    "dispatch timed out"
                );
                self.next = result.record_index + 1;
                self.fault("dispatch_timeout")
            }
        }
    }

    /// Dispatch the next record if its deadline has arrived.
    /// Returns `true` when the task should exit.
    async fn poll_due(&mut self) -> bool {
        if self.pending.is_some()
            || !matches!(self.state, RunState::RunningAuto | RunState::RunningManual)
        {
            return false;
        }
        let Some(deadline) = self.deadline else {
            return false;
        };
        if !scheduler::is_due(deadline, Instant::now()) {
            return false;
        }

        let Some(record) = self.sequence.record(self.next) else {
            // Cursor past the end without a completion seen; nothing to do.
            self.transition(RunState::Complete);
            return true;
        };
        let (index, opcode, args) = (record.index, record.opcode, record.args.clone());
        match self.gateway.dispatch(index, opcode, args).await {
            Ok(pending) => {
                tracing::debug!(
                    sequence = %self.sequence.name(),
                    record = index,
                    opcode,
                    "record dispatched"
                );
                self.deadline = None;
                self.pending = Some(pending);
                false
            }
            Err(_) => {
                tracing::error!(
                    sequence = %self.sequence.name(),
                    record = index,
                    "command router unavailable"
                );
                self.fault("dispatch_failed")
            }
        }
    }

    /// Enter `Error` and halt; the sequence stays parked until cancelled.
    fn fault(&mut self, code: &str) -> bool {
        self.error = Some(code.to_string());
        self.deadline = None;
        self.transition(RunState::Error);
        // Stay alive: only a cancel releases an errored sequence.
        false
    }

    fn arm_first(&mut self) {
        let now = Instant::now();
        self.sequence_start = Some(now);
        self.last_completion = None;
        self.next = 0;
        self.arm_next();
    }

    fn arm_next(&mut self) {
        let Some(record) = self.sequence.record(self.next) else {
            self.deadline = None;
            return;
        };
        let start = self.sequence_start.unwrap_or_else(Instant::now);
        self.deadline = Some(scheduler::deadline(
            &record.time_tag,
            start,
            self.last_completion,
        ));
    }

    fn misuse(&self, command: &'static str) -> EngineError {
        tracing::warn!(
            sequence = %self.sequence.name(),
            command,
            state = %self.state,
            "command rejected"
        );
        EngineError::ProtocolMisuse {
            command,
            state: self.state,
        }
    }

    fn transition(&mut self, to: RunState) {
        tracing::info!(
            sequence = %self.sequence.name(),
            from = %self.state,
            to = %to,
            "state transition"
        );
        self.state = to;
        self.state_tx.send_replace(to);
        self.emit();
        if to.is_terminal() {
            self.terminal_tx.send_replace(true);
        }
    }

    fn emit(&self) {
        self.bus.publish(&StatusEvent::new(
            self.sequence.name(),
            self.mode,
            self.state,
            self.cursor(),
            self.error.clone(),
        ));
    }

    /// The record currently in flight, or the most recently completed one.
    fn cursor(&self) -> u32 {
        match &self.pending {
            Some(p) => p.record_index(),
            None => self.next.saturating_sub(1),
        }
    }
}
