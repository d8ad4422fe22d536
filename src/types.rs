//src/types.rs

use std::collections::BTreeMap;

use serde::Serialize;

use crate::mods::ModTable;
use crate::record::{AlignmentKind, AlignmentOutcome, AlignmentRecord, ModCode};

/// Header metadata returned by `peek`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeekResult {
    pub contigs: BTreeMap<String, u64>,
    /// Each entry is `[base, strand, mod_code]`
    pub modifications: Vec<[String; 3]>,
}

/// Alignment fields of a read summary. Unmapped reads carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AlignmentSummary {
    Mapped {
        contig: String,
        reference_start: u64,
        reference_end: u64,
        alignment_length: u64,
    },
    Unmapped {},
}

impl From<&AlignmentOutcome> for AlignmentSummary {
    fn from(outcome: &AlignmentOutcome) -> Self {
        match outcome {
            AlignmentOutcome::Mapped(m) => Self::Mapped {
                contig: m.contig.clone(),
                reference_start: m.start,
                reference_end: m.end(),
                alignment_length: m.align_len(),
            },
            AlignmentOutcome::Unmapped => Self::Unmapped {},
        }
    }
}

/// One row of `read_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadInfoRecord {
    pub read_id: String,
    pub sequence_length: u64,
    #[serde(flatten)]
    pub alignment: AlignmentSummary,
    pub alignment_type: AlignmentKind,
    /// e.g. `T+T:3;(probabilities >= 0, PHRED base qual >= 0)` or `NA`
    pub mod_count: String,
}

impl ReadInfoRecord {
    /// Summarises a read and its decoded calls. `thresholds` is the
    /// parenthesised filter description appended to non-empty counts.
    pub fn new(record: &AlignmentRecord, table: &ModTable, thresholds: &str) -> Self {
        let mod_count = match table.count_summary() {
            Some(counts) => format!("{counts}({thresholds})"),
            None => "NA".to_string(),
        };
        Self {
            read_id: record.read_id().to_string(),
            sequence_length: record.seq_len(),
            alignment: AlignmentSummary::from(record.outcome()),
            alignment_type: record.kind(),
            mod_count,
        }
    }
}

/// One row of `bam_mods`: the read summary plus every surviving call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BamModRecord {
    #[serde(flatten)]
    pub info: ReadInfoRecord,
    pub mod_table: ModTable,
}

/// One window of one tag group of one read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowRow {
    pub contig: Option<String>,
    pub ref_win_start: Option<u64>,
    pub ref_win_end: Option<u64>,
    pub read_id: String,
    pub win_val: f64,
    pub strand: char,
    pub base: char,
    pub mod_strand: char,
    pub mod_type: ModCode,
    /// Sequence span of the window, half-open
    pub win_start: u64,
    pub win_end: u64,
    /// Mean base quality, 255 when any base lacks one
    pub basecall_qual: u8,
}

/// One row of `seq_table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SeqTableRow {
    pub read_id: String,
    pub sequence: String,
    pub qualities: Vec<u8>,
}
