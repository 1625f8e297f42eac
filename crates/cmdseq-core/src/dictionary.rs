use crate::error::{CmdSeqError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// CommandEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEntry {
    pub opcode: u32,
    pub mnemonic: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DictionaryFile {
    commands: Vec<CommandEntry>,
}

// ---------------------------------------------------------------------------
// CommandDictionary
// ---------------------------------------------------------------------------

/// The deployment's opcode table.
///
/// Loaded once at startup from the same dictionary the ground compiler used,
/// then shared read-only. The decoder rejects any sequence record whose
/// opcode is not present here.
#[derive(Debug, Clone, Default)]
pub struct CommandDictionary {
    entries: HashMap<u32, CommandEntry>,
}

impl CommandDictionary {
    pub fn from_entries(entries: Vec<CommandEntry>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.mnemonic.trim().is_empty() {
                return Err(CmdSeqError::InvalidDictionary(format!(
                    "opcode {:#06x} has an empty mnemonic",
                    entry.opcode
                )));
            }
            if map.insert(entry.opcode, entry.clone()).is_some() {
                return Err(CmdSeqError::InvalidDictionary(format!(
                    "duplicate opcode {:#06x}",
                    entry.opcode
                )));
            }
        }
        Ok(CommandDictionary { entries: map })
    }

    /// Load a dictionary from a YAML file of the form:
    ///
    /// ```yaml
    /// commands:
    ///   - opcode: 256
    ///     mnemonic: CMD_NO_OP
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let file: DictionaryFile = serde_yaml::from_str(data)?;
        Self::from_entries(file.commands)
    }

    pub fn contains(&self, opcode: u32) -> bool {
        self.entries.contains_key(&opcode)
    }

    pub fn mnemonic(&self, opcode: u32) -> Option<&str> {
        self.entries.get(&opcode).map(|e| e.mnemonic.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
