// src/cigar.rs

use std::fmt::{self, Write};

use crate::error::{Error, Result};

/// Alignment operation with zero-cost conversion to/from its CIGAR byte
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CigarOp {
    M = b'M',  // Match/mismatch
    I = b'I',  // Insertion to reference
    D = b'D',  // Deletion from reference
    N = b'N',  // Skipped region (intron)
    S = b'S',  // Soft clip
    H = b'H',  // Hard clip
    P = b'P',  // Padding
    Eq = b'=', // Sequence match
    X = b'X',  // Sequence mismatch
}

impl CigarOp {
    /// Convert from byte representation
    #[inline]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'M' => Some(Self::M),
            b'I' => Some(Self::I),
            b'D' => Some(Self::D),
            b'N' => Some(Self::N),
            b'S' => Some(Self::S),
            b'H' => Some(Self::H),
            b'P' => Some(Self::P),
            b'=' => Some(Self::Eq),
            b'X' => Some(Self::X),
            _ => None,
        }
    }

    /// Returns true if this operation consumes query bases
    #[inline]
    pub const fn consumes_query(self) -> bool {
        matches!(self, Self::M | Self::I | Self::S | Self::Eq | Self::X)
    }

    /// Returns true if this operation consumes reference bases
    #[inline]
    pub const fn consumes_ref(self) -> bool {
        matches!(self, Self::M | Self::D | Self::N | Self::Eq | Self::X)
    }
}

/// One operation with its run length
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CigarElem {
    pub op: CigarOp,
    pub len: u32,
}

impl CigarElem {
    pub const fn new(op: CigarOp, len: u32) -> Self {
        Self { op, len }
    }
}

/// An ordered list of alignment operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cigar(Vec<CigarElem>);

impl Cigar {
    pub fn new(elems: Vec<CigarElem>) -> Self {
        Self(elems)
    }

    /// Parses CIGAR text such as `10M2I5M`. `*` yields an empty list.
    pub fn parse(text: &str) -> Result<Self> {
        if text == "*" {
            return Ok(Self::default());
        }
        let mut elems = Vec::new();
        let mut len: u32 = 0;
        let mut have_digits = false;
        for b in text.bytes() {
            if b.is_ascii_digit() {
                len = len
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(u32::from(b - b'0')))
                    .ok_or_else(|| Error::data(format!("CIGAR length overflow in {text}")))?;
                have_digits = true;
                continue;
            }
            let op = CigarOp::from_byte(b)
                .ok_or_else(|| Error::data(format!("unknown CIGAR operation '{}' in {text}", b as char)))?;
            if !have_digits {
                return Err(Error::data(format!("CIGAR operation without length in {text}")));
            }
            elems.push(CigarElem::new(op, len));
            len = 0;
            have_digits = false;
        }
        if have_digits {
            return Err(Error::data(format!("dangling length at end of CIGAR {text}")));
        }
        Ok(Self(elems))
    }

    pub fn elems(&self) -> &[CigarElem] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of reference bases spanned by the alignment
    pub fn reference_len(&self) -> u64 {
        self.0
            .iter()
            .filter(|e| e.op.consumes_ref())
            .map(|e| u64::from(e.len))
            .sum()
    }

    /// Number of stored sequence bases the operations account for
    pub fn query_len(&self) -> u64 {
        self.0
            .iter()
            .filter(|e| e.op.consumes_query())
            .map(|e| u64::from(e.len))
            .sum()
    }

    /// Maps every stored sequence position to the reference position it
    /// aligns to, or `None` for inserted and soft-clipped bases.
    pub fn reference_positions(&self, ref_start: u64, seq_len: usize) -> Result<Vec<Option<u64>>> {
        if self.query_len() != seq_len as u64 {
            return Err(Error::data(format!(
                "CIGAR {self} covers {} bases but the sequence has {seq_len}",
                self.query_len()
            )));
        }
        let mut out = Vec::with_capacity(seq_len);
        let mut r = ref_start;
        for e in &self.0 {
            let n = u64::from(e.len);
            match (e.op.consumes_query(), e.op.consumes_ref()) {
                (true, true) => {
                    out.extend((r..r + n).map(Some));
                    r += n;
                }
                (true, false) => out.extend(std::iter::repeat(None).take(e.len as usize)),
                (false, true) => r += n,
                (false, false) => {}
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_char('*');
        }
        for e in &self.0 {
            write!(f, "{}{}", e.len, e.op as u8 as char)?;
        }
        Ok(())
    }
}
