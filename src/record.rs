// src/record.rs

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::cigar::Cigar;
use crate::error::{Error, Result};

/// Mapping quality value meaning "not available".
pub const MAPQ_UNAVAILABLE: u8 = 255;

/// Base quality value used when qualities are missing, and for deletions.
pub const QUAL_UNAVAILABLE: u8 = 255;

/// How a record aligned, combining primary/secondary/supplementary with strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlignmentKind {
    PrimaryForward,
    PrimaryReverse,
    SecondaryForward,
    SecondaryReverse,
    SupplementaryForward,
    SupplementaryReverse,
    Unmapped,
}

impl AlignmentKind {
    pub const ALL: [Self; 7] = [
        Self::PrimaryForward,
        Self::PrimaryReverse,
        Self::SecondaryForward,
        Self::SecondaryReverse,
        Self::SupplementaryForward,
        Self::SupplementaryReverse,
        Self::Unmapped,
    ];

    /// Derives the kind from SAM flag bits. Paired-end and duplicate flags
    /// are not supported by this engine.
    pub fn from_flags(flags: u16) -> Result<Self> {
        const PAIRED_OR_DUP: u16 = 0x1 | 0x2 | 0x8 | 0x20 | 0x40 | 0x80 | 0x400;
        if flags & PAIRED_OR_DUP != 0 {
            return Err(Error::data(format!(
                "flag {flags}: paired-read/mate-read formats or duplicate reads are not supported"
            )));
        }
        let kind = match (
            flags & 0x10 != 0,
            flags & 0x4 != 0,
            flags & 0x100 != 0,
            flags & 0x800 != 0,
        ) {
            (false, true, false, false) => Self::Unmapped,
            (false, false, false, false) => Self::PrimaryForward,
            (true, false, false, false) => Self::PrimaryReverse,
            (false, false, true, false) => Self::SecondaryForward,
            (true, false, true, false) => Self::SecondaryReverse,
            (false, false, false, true) => Self::SupplementaryForward,
            (true, false, false, true) => Self::SupplementaryReverse,
            _ => return Err(Error::data(format!("flag {flags} is not a valid alignment state"))),
        };
        Ok(kind)
    }

    /// SAM flag bits for this kind
    pub fn to_flags(self) -> u16 {
        match self {
            Self::PrimaryForward => 0,
            Self::PrimaryReverse => 0x10,
            Self::SecondaryForward => 0x100,
            Self::SecondaryReverse => 0x110,
            Self::SupplementaryForward => 0x800,
            Self::SupplementaryReverse => 0x810,
            Self::Unmapped => 0x4,
        }
    }

    #[inline]
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::PrimaryReverse | Self::SecondaryReverse | Self::SupplementaryReverse
        )
    }

    #[inline]
    pub fn is_unmapped(self) -> bool {
        self == Self::Unmapped
    }

    /// `+`, `-` or `.` for unmapped reads
    pub fn strand(self) -> char {
        match self {
            Self::Unmapped => '.',
            k if k.is_reverse() => '-',
            _ => '+',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryForward => "primary_forward",
            Self::PrimaryReverse => "primary_reverse",
            Self::SecondaryForward => "secondary_forward",
            Self::SecondaryReverse => "secondary_reverse",
            Self::SupplementaryForward => "supplementary_forward",
            Self::SupplementaryReverse => "supplementary_reverse",
            Self::Unmapped => "unmapped",
        }
    }
}

impl FromStr for AlignmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown read filter token '{s}'")))
    }
}

impl fmt::Display for AlignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AlignmentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Which strand a modification call refers to: the basecalled strand (`+`)
/// or its complement (`-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModStrand {
    Basecalled,
    Complement,
}

impl ModStrand {
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            '+' => Ok(Self::Basecalled),
            '-' => Ok(Self::Complement),
            _ => Err(Error::data(format!("invalid modification strand '{c}'"))),
        }
    }

    /// Parses the caller-facing spelling, `bc` or `bc_comp`.
    pub fn from_option(s: &str) -> Result<Self> {
        match s {
            "bc" => Ok(Self::Basecalled),
            "bc_comp" => Ok(Self::Complement),
            _ => Err(Error::config(format!("modStrand must be 'bc' or 'bc_comp', got '{s}'"))),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Basecalled => '+',
            Self::Complement => '-',
        }
    }
}

/// Modification code: a single letter (`m`, `h`, `T`) or a ChEBI number (`7200`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModCode {
    Letter(char),
    ChEBI(u32),
}

impl FromStr for ModCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Ok(Self::Letter(c)),
            _ if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
                .parse()
                .map(Self::ChEBI)
                .map_err(|_| Error::config(format!("modification code '{s}' is out of range"))),
            _ => Err(Error::config(format!(
                "invalid modification tag '{s}': expected one letter or a number"
            ))),
        }
    }
}

impl fmt::Display for ModCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Letter(c) => write!(f, "{c}"),
            Self::ChEBI(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for ModCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The `(base, strand, code)` key that identifies one kind of modification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModTriple {
    pub base: u8,
    pub strand: ModStrand,
    pub code: ModCode,
}

impl ModTriple {
    pub fn new(base: u8, strand: ModStrand, code: ModCode) -> Self {
        Self { base, strand, code }
    }

    /// `[base, strand, code]` as strings, the shape `peek` reports
    pub fn to_strings(&self) -> [String; 3] {
        [
            (self.base as char).to_string(),
            self.strand.as_char().to_string(),
            self.code.to_string(),
        ]
    }
}

impl fmt::Display for ModTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.base as char, self.strand.as_char(), self.code)
    }
}

/// Raw modification data for one `(base, strand, code)`: an ordered list of
/// `(skip, probability)` pairs. `skip` counts how many candidate bases to
/// pass over before the base that carries the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationTagGroup {
    pub triple: ModTriple,
    pub calls: Vec<(u32, u8)>,
}

impl ModificationTagGroup {
    pub fn new(triple: ModTriple, calls: Vec<(u32, u8)>) -> Self {
        Self { triple, calls }
    }
}

/// Where a mapped record sits on the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub contig_id: usize,
    pub contig: String,
    /// 0-based leftmost reference position
    pub start: u64,
    pub cigar: Cigar,
}

impl Mapping {
    /// Exclusive reference end
    pub fn end(&self) -> u64 {
        self.start + self.cigar.reference_len()
    }

    pub fn align_len(&self) -> u64 {
        self.cigar.reference_len()
    }
}

/// Alignment fields exist only on mapped records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentOutcome {
    Mapped(Mapping),
    Unmapped,
}

/// One alignment record as produced by a record source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    read_id: String,
    kind: AlignmentKind,
    outcome: AlignmentOutcome,
    sequence: Vec<u8>,
    qualities: Option<Vec<u8>>,
    mapq: u8,
    mod_groups: Vec<ModificationTagGroup>,
}

impl AlignmentRecord {
    /// Builds a record, checking that the kind agrees with the outcome and
    /// that qualities (if present) line up with the sequence.
    pub fn new(
        read_id: impl Into<String>,
        kind: AlignmentKind,
        outcome: AlignmentOutcome,
        sequence: Vec<u8>,
        qualities: Option<Vec<u8>>,
        mapq: u8,
        mod_groups: Vec<ModificationTagGroup>,
    ) -> Result<Self> {
        let read_id = read_id.into();
        if kind.is_unmapped() != matches!(outcome, AlignmentOutcome::Unmapped) {
            return Err(Error::data(format!(
                "read {read_id}: alignment kind {kind} disagrees with its coordinates"
            )));
        }
        if let Some(q) = &qualities {
            if q.len() != sequence.len() {
                return Err(Error::data(format!(
                    "read {read_id}: {} qualities for {} bases",
                    q.len(),
                    sequence.len()
                )));
            }
        }
        Ok(Self { read_id, kind, outcome, sequence, qualities, mapq, mod_groups })
    }

    pub fn read_id(&self) -> &str {
        &self.read_id
    }

    pub fn kind(&self) -> AlignmentKind {
        self.kind
    }

    pub fn outcome(&self) -> &AlignmentOutcome {
        &self.outcome
    }

    pub fn mapping(&self) -> Option<&Mapping> {
        match &self.outcome {
            AlignmentOutcome::Mapped(m) => Some(m),
            AlignmentOutcome::Unmapped => None,
        }
    }

    /// Stored sequence, in reference orientation for reverse alignments
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn seq_len(&self) -> u64 {
        self.sequence.len() as u64
    }

    pub fn qualities(&self) -> Option<&[u8]> {
        self.qualities.as_deref()
    }

    /// Base quality at a stored position, or the unavailable sentinel
    #[inline]
    pub fn base_qual(&self, pos: usize) -> u8 {
        self.qualities
            .as_ref()
            .and_then(|q| q.get(pos).copied())
            .unwrap_or(QUAL_UNAVAILABLE)
    }

    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    pub fn mod_groups(&self) -> &[ModificationTagGroup] {
        &self.mod_groups
    }

    /// Sequence as the instrument read it (reverse complemented for reverse alignments)
    pub fn basecalled_sequence(&self) -> Vec<u8> {
        if self.kind.is_reverse() {
            revcomp(&self.sequence)
        } else {
            self.sequence.iter().map(u8::to_ascii_uppercase).collect()
        }
    }
}

/// Watson-Crick complement; anything other than ACGT maps to `N`.
#[inline]
pub fn complement(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}
