use thiserror::Error;

#[derive(Debug, Error)]
pub enum CmdSeqError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unsupported sequence format version {0}")]
    UnsupportedVersion(u16),

    #[error("checksum mismatch: header declares {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("sequence declares no records")]
    EmptySequence,

    #[error("record {index} is truncated")]
    TruncatedRecord { index: u32 },

    #[error("record count mismatch: header declares {declared}, decoded {found}")]
    RecordCountMismatch { declared: u32, found: u32 },

    #[error("{0} trailing bytes after the last record")]
    TrailingBytes(usize),

    #[error("record {index}: opcode {opcode:#06x} not in command dictionary")]
    UnknownOpcode { index: u32, opcode: u32 },

    #[error("invalid time tag: {0}")]
    InvalidTimeTag(String),

    #[error("record {index}: absolute time tag precedes an earlier record's")]
    NonMonotonicTimeTag { index: u32 },

    #[error("invalid command dictionary: {0}")]
    InvalidDictionary(String),

    #[error("invalid run state: {0}")]
    InvalidRunState(String),

    #[error("invalid run mode: {0}")]
    InvalidRunMode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CmdSeqError>;
