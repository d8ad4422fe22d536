// src/filter.rs

use ahash::RandomState;

use crate::error::Result;
use crate::mods::{self, ModTable};
use crate::options::{FilterSpec, ModFilter, ReadFilter};
use crate::record::{AlignmentRecord, MAPQ_UNAVAILABLE};
use crate::region::ResolvedRegion;
use crate::source::Contig;

// Fixed keys so a given seed always maps a read id to the same draw.
const SAMPLE_KEYS: [u64; 3] = [0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344, 0xa409_3822_299f_31d0];

/// Per-read Bernoulli inclusion driven by a hash of the read id.
///
/// With a seed the decision for a read id is fixed, so repeated queries (and
/// different pages of one query) agree. Without one, each sampler draws
/// fresh random keys.
///
/// ahash does not promise stable output across its versions or target
/// platforms, so a seeded selection only reproduces within one build.
#[derive(Debug, Clone)]
pub struct Sampler {
    fraction: f64,
    state: RandomState,
}

impl Sampler {
    pub fn new(fraction: f64, seed: Option<u64>) -> Self {
        let state = match seed {
            Some(s) => RandomState::with_seeds(s, SAMPLE_KEYS[0], SAMPLE_KEYS[1], SAMPLE_KEYS[2]),
            None => RandomState::new(),
        };
        Self { fraction, state }
    }

    /// Maps the read id into `[0, 1)` and keeps it if below the fraction.
    pub fn includes(&self, read_id: &str) -> bool {
        if self.fraction >= 1.0 {
            return true;
        }
        if self.fraction <= 0.0 {
            return false;
        }
        let draw = (self.state.hash_one(read_id) >> 11) as f64 / (1u64 << 53) as f64;
        draw < self.fraction
    }
}

/// Read-level filtering plus the bound modification filter for one query.
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    reads: ReadFilter,
    mods: ModFilter,
    region: Option<ResolvedRegion>,
    mod_region: Option<ResolvedRegion>,
}

impl FilterPipeline {
    /// Resolves the filter regions against the source's contigs. Unknown
    /// contigs fail here, before any record is read.
    pub fn new(spec: &FilterSpec, contigs: &[Contig]) -> Result<Self> {
        let region = spec.reads.region.as_ref().map(|r| r.resolve(contigs)).transpose()?;
        let mod_region = spec.mods.region.as_ref().map(|r| r.resolve(contigs)).transpose()?;
        if let Some(r) = &region {
            log::debug!("region resolved to {}:{}-{}", r.contig, r.start, r.end);
        }
        Ok(Self {
            reads: spec.reads.clone(),
            mods: spec.mods.clone(),
            region,
            mod_region,
        })
    }

    pub fn region(&self) -> Option<&ResolvedRegion> {
        self.region.as_ref()
    }

    /// True if the record passes every read-level predicate.
    pub fn accepts(&self, record: &AlignmentRecord) -> bool {
        let f = &self.reads;
        let seq_len = record.seq_len();
        if seq_len == 0 {
            return false;
        }
        if f.min_seq_len.is_some_and(|min| seq_len < min) {
            return false;
        }
        if let Some(min) = f.min_align_len {
            match record.mapping() {
                Some(m) if m.align_len() as i64 >= min => {}
                _ => return false,
            }
        }
        if f.kinds.as_ref().is_some_and(|k| !k.contains(&record.kind())) {
            return false;
        }
        if !f.read_ids.is_empty() && !f.read_ids.contains(record.read_id()) {
            return false;
        }
        if record.mapq() == MAPQ_UNAVAILABLE {
            if f.exclude_mapq_unavail {
                return false;
            }
        } else if f.mapq_filter.is_some_and(|min| record.mapq() < min) {
            return false;
        }
        if let Some(region) = &self.region {
            let Some(m) = record.mapping() else {
                return false;
            };
            let hit = if f.full_region {
                region.is_contained_by(&m.contig, m.start, m.end())
            } else {
                region.overlaps(&m.contig, m.start, m.end())
            };
            if !hit {
                return false;
            }
        }
        f.sampler.as_ref().map_or(true, |s| s.includes(record.read_id()))
    }

    /// Decodes the record's modification calls under the modification filter.
    pub fn decode(&self, record: &AlignmentRecord) -> Result<ModTable> {
        mods::decode(record, &self.mods, self.mod_region.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::num::NonZeroUsize;

    use super::*;
    use crate::options::QueryOptions;
    use crate::sam::SamSource;
    use crate::source::RecordSource;

    fn fixture() -> (Vec<Contig>, Vec<AlignmentRecord>) {
        let src = SamSource::open("data/example_1.sam").unwrap();
        let contigs = src.contigs().to_vec();
        let records = src
            .iterate(None, NonZeroUsize::new(1).unwrap())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        (contigs, records)
    }

    fn count(opts: &QueryOptions) -> usize {
        let (contigs, records) = fixture();
        let spec = FilterSpec::try_from(opts).unwrap();
        let pipeline = FilterPipeline::new(&spec, &contigs).unwrap();
        records.iter().filter(|r| pipeline.accepts(r)).count()
    }

    fn base() -> QueryOptions {
        QueryOptions::new("data/example_1.sam")
    }

    #[test]
    fn test_no_filters_accepts_all() {
        assert_eq!(count(&base()), 4);
        assert_eq!(count(&QueryOptions { read_id_set: Some(vec![]), ..base() }), 4);
    }

    #[test]
    fn test_length_filters_are_monotonic() {
        let mut last = usize::MAX;
        for min in [0, 8, 9, 33, 34, 48, 49] {
            let n = count(&QueryOptions { min_seq_len: Some(min), ..base() });
            assert!(n <= last);
            last = n;
        }
        assert_eq!(last, 0);
        // unmapped reads never satisfy an alignment length bound
        assert_eq!(count(&QueryOptions { min_align_len: Some(0), ..base() }), 3);
        assert_eq!(count(&QueryOptions { min_align_len: Some(40), ..base() }), 1);
    }

    #[test]
    fn test_mapq_filters() {
        assert_eq!(count(&QueryOptions { mapq_filter: Some(20), ..base() }), 3);
        let only_unavail = QueryOptions { mapq_filter: Some(255), ..base() };
        assert_eq!(count(&only_unavail), 1);
        assert_eq!(
            count(&QueryOptions { exclude_mapq_unavail: Some(true), ..only_unavail }),
            0
        );
    }

    #[test]
    fn test_kind_and_id_filters() {
        let kinds = QueryOptions { read_filter: Some("primary_reverse unmapped".into()), ..base() };
        assert_eq!(count(&kinds), 2);
        let ids = QueryOptions {
            read_id_set: Some(vec!["a4f36092-b4d5-47a9-813e-c22c3b477a0c".into()]),
            ..base()
        };
        assert_eq!(count(&ids), 2);
    }

    #[test]
    fn test_region_overlap_and_full() {
        assert_eq!(count(&QueryOptions { region: Some("dummyI:16-20".into()), ..base() }), 1);
        assert_eq!(count(&QueryOptions { region: Some("dummyI:17-20".into()), ..base() }), 0);
        let full = QueryOptions {
            region: Some("dummyIII:23-40".into()),
            full_region: Some(true),
            ..base()
        };
        assert_eq!(count(&full), 1);
        let too_wide = QueryOptions { region: Some("dummyIII:0-40".into()), ..full };
        assert_eq!(count(&too_wide), 0);
    }

    #[test]
    fn test_unknown_region_contig_is_not_found() {
        let (contigs, _) = fixture();
        let spec = FilterSpec::try_from(&QueryOptions { region: Some("chrZ".into()), ..base() }).unwrap();
        assert!(matches!(
            FilterPipeline::new(&spec, &contigs),
            Err(crate::error::Error::NotFound(_))
        ));
    }

    fn ids() -> Vec<String> {
        (0..1000).map(|i| format!("read-{i:04}")).collect()
    }

    fn sampled(s: &Sampler) -> HashSet<String> {
        ids().into_iter().filter(|id| s.includes(id)).collect()
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let a = sampled(&Sampler::new(0.5, Some(42)));
        let b = sampled(&Sampler::new(0.5, Some(42)));
        let c = sampled(&Sampler::new(0.5, Some(43)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!((350..=650).contains(&a.len()), "{}", a.len());
    }

    #[test]
    fn test_sampling_edges() {
        assert_eq!(sampled(&Sampler::new(1.0, None)).len(), 1000);
        assert_eq!(sampled(&Sampler::new(1.0, Some(7))).len(), 1000);
        assert!(sampled(&Sampler::new(0.0, Some(7))).is_empty());
        let unseeded = sampled(&Sampler::new(0.5, None)).len();
        assert!((350..=650).contains(&unseeded), "{unseeded}");
    }
}
