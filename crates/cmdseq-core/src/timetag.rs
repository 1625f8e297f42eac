use crate::error::{CmdSeqError, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// TagMode
// ---------------------------------------------------------------------------

/// How a record's time tag is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagMode {
    /// Offset from the instant the sequence started executing.
    Absolute,
    /// Offset from the completion of the immediately preceding record.
    Relative,
}

impl TagMode {
    /// Wire encoding of the mode byte.
    pub fn to_wire(self) -> u8 {
        match self {
            TagMode::Absolute => 1,
            TagMode::Relative => 2,
        }
    }

    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(TagMode::Absolute),
            2 => Ok(TagMode::Relative),
            other => Err(CmdSeqError::InvalidTimeTag(format!(
                "unknown tag mode byte {other:#04x}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TimeTag
// ---------------------------------------------------------------------------

/// A record's dispatch time: an anchor mode plus an offset with millisecond
/// resolution.
///
/// The text form is the one used by sequence source files: `A` or `R`
/// followed by `HH:MM:SS`, with an optional `.mmm` fraction, e.g.
/// `R00:00:01.050`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTag {
    mode: TagMode,
    seconds: u32,
    millis: u32,
}

impl TimeTag {
    pub fn new(mode: TagMode, seconds: u32, millis: u32) -> Result<Self> {
        if millis >= 1000 {
            return Err(CmdSeqError::InvalidTimeTag(format!(
                "millisecond field {millis} out of range"
            )));
        }
        Ok(TimeTag {
            mode,
            seconds,
            millis,
        })
    }

    /// A zero-offset relative tag: "dispatch as soon as the previous record
    /// completes".
    pub fn immediate() -> Self {
        TimeTag {
            mode: TagMode::Relative,
            seconds: 0,
            millis: 0,
        }
    }

    pub fn mode(&self) -> TagMode {
        self.mode
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn millis(&self) -> u32 {
        self.millis
    }

    /// The tag's offset from its anchor.
    pub fn offset(&self) -> Duration {
        Duration::from_secs(u64::from(self.seconds)) + Duration::from_millis(u64::from(self.millis))
    }
}

impl fmt::Display for TimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.mode {
            TagMode::Absolute => 'A',
            TagMode::Relative => 'R',
        };
        let hours = self.seconds / 3600;
        let minutes = (self.seconds % 3600) / 60;
        let seconds = self.seconds % 60;
        write!(f, "{prefix}{hours:02}:{minutes:02}:{seconds:02}")?;
        if self.millis > 0 {
            write!(f, ".{:03}", self.millis)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for TimeTag {
    type Err = CmdSeqError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || CmdSeqError::InvalidTimeTag(s.to_string());

        let mut chars = s.chars();
        let mode = match chars.next() {
            Some('A') => TagMode::Absolute,
            Some('R') => TagMode::Relative,
            _ => return Err(bad()),
        };
        let rest = chars.as_str();

        let (clock, fraction) = match rest.split_once('.') {
            Some((c, f)) => (c, Some(f)),
            None => (rest, None),
        };

        let mut fields = clock.split(':');
        let hours: u32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(bad)?;
        let minutes: u32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(bad)?;
        let seconds: u32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(bad)?;
        if fields.next().is_some() || minutes >= 60 || seconds >= 60 {
            return Err(bad());
        }

        let millis = match fraction {
            None => 0,
            Some(f) if f.is_empty() || f.len() > 3 || !f.chars().all(|c| c.is_ascii_digit()) => {
                return Err(bad())
            }
            // ".05" means 50 ms: right-pad the fraction to milliseconds.
            Some(f) => {
                let padded = format!("{f:0<3}");
                padded.parse().map_err(|_| bad())?
            }
        };

        TimeTag::new(mode, hours * 3600 + minutes * 60 + seconds, millis)
    }
}

impl Serialize for TimeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
