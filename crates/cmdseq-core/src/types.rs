use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Execution state of one loaded sequence.
///
/// `Complete`, `Error`, and `Cancelled` are terminal: the sequence never
/// leaves them, and `Error` additionally accepts a cancel to release the
/// loaded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loaded,
    RunningAuto,
    RunningManual,
    WaitingStep,
    Complete,
    Error,
    Cancelled,
}

impl RunState {
    pub fn all() -> &'static [RunState] {
        &[
            RunState::Idle,
            RunState::Loaded,
            RunState::RunningAuto,
            RunState::RunningManual,
            RunState::WaitingStep,
            RunState::Complete,
            RunState::Error,
            RunState::Cancelled,
        ]
    }

    /// A terminal state is one the sequence can never advance out of.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Error | RunState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Loaded => "loaded",
            RunState::RunningAuto => "running_auto",
            RunState::RunningManual => "running_manual",
            RunState::WaitingStep => "waiting_step",
            RunState::Complete => "complete",
            RunState::Error => "error",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = crate::error::CmdSeqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RunState::Idle),
            "loaded" => Ok(RunState::Loaded),
            "running_auto" => Ok(RunState::RunningAuto),
            "running_manual" => Ok(RunState::RunningManual),
            "waiting_step" => Ok(RunState::WaitingStep),
            "complete" => Ok(RunState::Complete),
            "error" => Ok(RunState::Error),
            "cancelled" => Ok(RunState::Cancelled),
            _ => Err(crate::error::CmdSeqError::InvalidRunState(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RunMode
// ---------------------------------------------------------------------------

/// Component-level execution mode.
///
/// The mode governs how the *next* run or start behaves; toggling it never
/// affects a sequence that is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Auto,
    Manual,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Auto => "auto",
            RunMode::Manual => "manual",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = crate::error::CmdSeqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(RunMode::Auto),
            "manual" => Ok(RunMode::Manual),
            _ => Err(crate::error::CmdSeqError::InvalidRunMode(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockMode
// ---------------------------------------------------------------------------

/// Whether a run request waits for the sequence to reach a terminal state
/// before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMode {
    Block,
    NoBlock,
}

impl fmt::Display for BlockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockMode::Block => "block",
            BlockMode::NoBlock => "no_block",
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
