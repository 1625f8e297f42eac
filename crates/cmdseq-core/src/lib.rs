pub mod dictionary;
pub mod error;
pub mod sequence;
pub mod status;
pub mod timetag;
pub mod types;

pub use dictionary::{CommandDictionary, CommandEntry};
pub use error::{CmdSeqError, Result};
pub use sequence::{Sequence, SequenceRecord};
pub use status::StatusEvent;
pub use timetag::{TagMode, TimeTag};
pub use types::{BlockMode, RunMode, RunState};
