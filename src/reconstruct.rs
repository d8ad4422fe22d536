// src/reconstruct.rs

use std::collections::HashSet;

use crate::cigar::CigarOp;
use crate::record::{AlignmentRecord, QUAL_UNAVAILABLE};
use crate::region::ResolvedRegion;

/// A read's bases over one reference region, with parallel qualities.
///
/// `.` marks a deletion, lowercase marks inserted bases, and `Z`/`z` replace
/// modified bases on the reference and inside insertions respectively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructedSequence {
    pub sequence: String,
    pub qualities: Vec<u8>,
}

impl ReconstructedSequence {
    fn push(&mut self, c: char, q: u8) {
        self.sequence.push(c);
        self.qualities.push(q);
    }
}

/// Rebuilds the part of `record` that lies on `region`. Insertions are kept
/// only when both flanking reference positions are inside the region.
/// Returns `None` for reads that are unmapped or on another contig.
pub fn reconstruct(
    record: &AlignmentRecord,
    region: &ResolvedRegion,
    modified: &HashSet<u64>,
) -> Option<ReconstructedSequence> {
    let m = record.mapping()?;
    if m.contig != region.contig {
        return None;
    }
    let seq = record.sequence();
    let in_region = |r: u64| (region.start..region.end).contains(&r);
    let mut out = ReconstructedSequence::default();
    let mut q = 0usize;
    let mut r = m.start;

    for e in m.cigar.elems() {
        let n = e.len as usize;
        match e.op {
            CigarOp::M | CigarOp::Eq | CigarOp::X => {
                for _ in 0..n {
                    if in_region(r) {
                        let c = if modified.contains(&(q as u64)) {
                            'Z'
                        } else {
                            seq.get(q).map_or('N', |b| b.to_ascii_uppercase() as char)
                        };
                        out.push(c, record.base_qual(q));
                    }
                    q += 1;
                    r += 1;
                }
            }
            CigarOp::I => {
                if region.contains_insertion(&m.contig, r) {
                    for k in q..q + n {
                        let c = if modified.contains(&(k as u64)) {
                            'z'
                        } else {
                            seq.get(k).map_or('n', |b| b.to_ascii_lowercase() as char)
                        };
                        out.push(c, record.base_qual(k));
                    }
                }
                q += n;
            }
            CigarOp::D | CigarOp::N => {
                for _ in 0..n {
                    if in_region(r) {
                        out.push('.', QUAL_UNAVAILABLE);
                    }
                    r += 1;
                }
            }
            CigarOp::S => q += n,
            CigarOp::H | CigarOp::P => {}
        }
    }
    Some(out)
}
