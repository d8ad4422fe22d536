use std::collections::HashSet;

use serde::Serialize;

use super::ModCall;
use crate::record::{ModCode, ModStrand, ModTriple};

/// Surviving calls of one `(base, strand, code)` group, sorted by sequence position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModTableEntry {
    pub triple: ModTriple,
    pub calls: Vec<ModCall>,
}

#[derive(Serialize)]
struct EntryRow<'a> {
    base: String,
    is_strand_plus: bool,
    mod_code: ModCode,
    data: &'a [ModCall],
}

impl Serialize for ModTableEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EntryRow {
            base: (self.triple.base as char).to_string(),
            is_strand_plus: self.triple.strand == ModStrand::Basecalled,
            mod_code: self.triple.code,
            data: &self.calls,
        }
        .serialize(serializer)
    }
}

/// All decoded calls of a read, grouped per tag group in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ModTable {
    entries: Vec<ModTableEntry>,
}

impl ModTable {
    pub(crate) fn push(&mut self, triple: ModTriple, mut calls: Vec<ModCall>) {
        calls.sort_by_key(|c| c.seq_pos);
        self.entries.push(ModTableEntry { triple, calls });
    }

    pub fn entries(&self) -> &[ModTableEntry] {
        &self.entries
    }

    /// True when no tag group survived the tag/strand filters
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_calls(&self) -> usize {
        self.entries.iter().map(|e| e.calls.len()).sum()
    }

    /// Stored positions with a surviving call at or above the modified threshold
    pub fn modified_positions(&self) -> HashSet<u64> {
        self.entries
            .iter()
            .flat_map(|e| e.calls.iter().filter(|c| c.is_modified()).map(|c| c.seq_pos))
            .collect()
    }

    /// `T+T:3;G-7200:0;` style count summary, or `None` when there is nothing to count
    pub fn count_summary(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(
            self.entries
                .iter()
                .map(|e| format!("{}:{};", e.triple, e.calls.len()))
                .collect(),
        )
    }
}
