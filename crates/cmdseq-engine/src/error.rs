use cmdseq_core::{CmdSeqError, RunMode, RunState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// An operator command that needs a loaded sequence arrived with none.
    /// Low severity: the command is rejected, nothing else changes.
    #[error("no sequence active")]
    NoActiveSequence,

    #[error("{command} not valid while sequence is {state}")]
    ProtocolMisuse {
        command: &'static str,
        state: RunState,
    },

    #[error("{command} not valid in {mode} mode")]
    WrongMode {
        command: &'static str,
        mode: RunMode,
    },

    #[error("sequence {name} is already active")]
    SequenceActive { name: String },

    #[error(transparent)]
    Decode(#[from] CmdSeqError),

    #[error("engine is shutting down")]
    EngineShutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
