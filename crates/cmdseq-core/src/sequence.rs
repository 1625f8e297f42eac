use crate::dictionary::CommandDictionary;
use crate::error::{CmdSeqError, Result};
use crate::timetag::{TagMode, TimeTag};
use std::path::Path;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// `"CSEQ"` big-endian.
pub const MAGIC: u32 = 0x4353_4551;
pub const FORMAT_VERSION: u16 = 1;

/// magic (4) + version (2) + record count (4) + CRC-32 (4).
pub const HEADER_LEN: usize = 14;

/// tag mode (1) + seconds (4) + millis (4) + opcode (4) + arg length (4).
pub const RECORD_FIXED_LEN: usize = 17;

// ---------------------------------------------------------------------------
// SequenceRecord
// ---------------------------------------------------------------------------

/// One time-tagged command entry within a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub index: u32,
    pub time_tag: TimeTag,
    pub opcode: u32,
    pub args: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// An ordered, immutable list of time-tagged commands decoded from a
/// compiled sequence file.
///
/// The engine only ever reads this format; the compiler that writes it is an
/// external ground tool. The stored CRC-32 is verified before any record can
/// be executed, so a sequence value in memory is always integrity-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    name: String,
    records: Vec<SequenceRecord>,
    checksum: u32,
}

impl Sequence {
    /// Read and decode a sequence file.
    ///
    /// The sequence's identity is its source path.
    pub fn load(path: &Path, dictionary: &CommandDictionary) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode(&path.display().to_string(), &bytes, dictionary)
    }

    /// Decode a binary sequence blob.
    ///
    /// Pure function of the input bytes and the command dictionary: validates
    /// the header (magic, version, record count, CRC-32), then each record's
    /// fixed-plus-variable encoding, then cross-record invariants
    /// (absolute time tags must not run backwards).
    pub fn decode(name: &str, bytes: &[u8], dictionary: &CommandDictionary) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CmdSeqError::MalformedHeader(format!(
                "file is {} bytes, header needs {HEADER_LEN}",
                bytes.len()
            )));
        }

        let mut reader = Reader::new(bytes);
        let magic = reader.read_u32().ok_or_else(short_header)?;
        if magic != MAGIC {
            return Err(CmdSeqError::MalformedHeader(format!(
                "bad magic {magic:#010x}, expected {MAGIC:#010x}"
            )));
        }
        let version = reader.read_u16().ok_or_else(short_header)?;
        if version != FORMAT_VERSION {
            return Err(CmdSeqError::UnsupportedVersion(version));
        }
        let declared = reader.read_u32().ok_or_else(short_header)?;
        if declared == 0 {
            return Err(CmdSeqError::EmptySequence);
        }
        let expected = reader.read_u32().ok_or_else(short_header)?;

        // The checksum covers everything after the checksum field itself.
        let computed = crc32fast::hash(&bytes[HEADER_LEN..]);
        if computed != expected {
            return Err(CmdSeqError::ChecksumMismatch { expected, computed });
        }

        let mut records = Vec::with_capacity(declared as usize);
        let mut last_absolute: Option<std::time::Duration> = None;
        for index in 0..declared {
            if reader.remaining() == 0 {
                // Clean end at a record boundary: the header promised more.
                return Err(CmdSeqError::RecordCountMismatch {
                    declared,
                    found: index,
                });
            }
            let record = decode_record(&mut reader, index, dictionary)?;

            if record.time_tag.mode() == TagMode::Absolute {
                let offset = record.time_tag.offset();
                if last_absolute.is_some_and(|prev| offset < prev) {
                    return Err(CmdSeqError::NonMonotonicTimeTag { index });
                }
                last_absolute = Some(offset);
            }
            records.push(record);
        }

        if reader.remaining() > 0 {
            return Err(CmdSeqError::TrailingBytes(reader.remaining()));
        }

        Ok(Sequence {
            name: name.to_string(),
            records,
            checksum: expected,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[SequenceRecord] {
        &self.records
    }

    pub fn record(&self, index: u32) -> Option<&SequenceRecord> {
        self.records.get(index as usize)
    }

    pub fn len(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

fn short_header() -> CmdSeqError {
    CmdSeqError::MalformedHeader("file shorter than header".to_string())
}

fn decode_record(
    reader: &mut Reader<'_>,
    index: u32,
    dictionary: &CommandDictionary,
) -> Result<SequenceRecord> {
    let truncated = || CmdSeqError::TruncatedRecord { index };

    let mode_byte = reader.read_u8().ok_or_else(truncated)?;
    let mode = TagMode::from_wire(mode_byte)?;
    let seconds = reader.read_u32().ok_or_else(truncated)?;
    let millis = reader.read_u32().ok_or_else(truncated)?;
    let time_tag = TimeTag::new(mode, seconds, millis)?;

    let opcode = reader.read_u32().ok_or_else(truncated)?;
    if !dictionary.contains(opcode) {
        return Err(CmdSeqError::UnknownOpcode { index, opcode });
    }

    let arg_len = reader.read_u32().ok_or_else(truncated)? as usize;
    let args = reader.take(arg_len).ok_or_else(truncated)?.to_vec();

    Ok(SequenceRecord {
        index,
        time_tag,
        opcode,
        args,
    })
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Big-endian cursor over the raw file bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
