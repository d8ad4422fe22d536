// src/source.rs

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use crate::error::Result;
use crate::record::{AlignmentRecord, ModTriple};
use crate::region::ResolvedRegion;

/// Number of leading records inspected when listing modification types.
pub const PEEK_RECORDS: usize = 100;

/// A reference sequence named in the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    pub name: String,
    pub length: u64,
}

impl Contig {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self { name: name.into(), length }
    }
}

/// Boxed record stream handed out by a source.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<AlignmentRecord>> + 'a>;

/// Something that produces alignment records in its natural order.
///
/// Iteration consumes the source; re-reading means re-opening it.
pub trait RecordSource {
    /// Contigs in header order
    fn contigs(&self) -> &[Contig];

    /// Distinct modification types seen in the first `max_records` records,
    /// sorted.
    fn modification_triples(&self, max_records: usize) -> Result<Vec<ModTriple>>;

    /// Streams records, optionally restricted to those that may touch
    /// `region`. Records outside the region may still be produced; callers
    /// filter precisely.
    fn iterate<'a>(self, region: Option<&'a ResolvedRegion>, threads: NonZeroUsize) -> Result<RecordIter<'a>>
    where
        Self: 'a;
}

/// Sorted distinct triples from a record stream
pub(crate) fn collect_triples<'r>(records: impl Iterator<Item = &'r AlignmentRecord>) -> Vec<ModTriple> {
    records
        .flat_map(|r| r.mod_groups().iter().map(|g| g.triple))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    contigs: Vec<Contig>,
    records: Vec<AlignmentRecord>,
}

impl VecSource {
    pub fn new(contigs: Vec<Contig>, records: Vec<AlignmentRecord>) -> Self {
        Self { contigs, records }
    }
}

impl RecordSource for VecSource {
    fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    fn modification_triples(&self, max_records: usize) -> Result<Vec<ModTriple>> {
        Ok(collect_triples(self.records.iter().take(max_records)))
    }

    fn iterate<'a>(self, _region: Option<&'a ResolvedRegion>, _threads: NonZeroUsize) -> Result<RecordIter<'a>>
    where
        Self: 'a,
    {
        Ok(Box::new(self.records.into_iter().map(Ok)))
    }
}
