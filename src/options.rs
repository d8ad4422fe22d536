// src/options.rs

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::filter::Sampler;
use crate::paginate::Page;
use crate::record::{AlignmentKind, ModCode, ModStrand};
use crate::region::GenomicRegion;

/// Reader threads used when the caller does not say.
pub const DEFAULT_THREADS: usize = 2;

/// Options shared by `read_info`, `bam_mods` and `seq_table`.
///
/// Field names follow the camelCase spelling callers send as JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub bam_path: String,
    pub treat_as_url: Option<bool>,
    pub min_seq_len: Option<u64>,
    pub min_align_len: Option<i64>,
    pub read_id_set: Option<Vec<String>>,
    pub threads: Option<i64>,
    pub include_zero_len: Option<bool>,
    /// Comma or whitespace separated alignment kinds
    pub read_filter: Option<String>,
    pub sample_fraction: Option<f64>,
    pub sample_seed: Option<u64>,
    pub mapq_filter: Option<u8>,
    pub exclude_mapq_unavail: Option<bool>,
    pub region: Option<String>,
    pub full_region: Option<bool>,
    pub tag: Option<String>,
    /// `bc` or `bc_comp`
    pub mod_strand: Option<String>,
    pub min_mod_qual: Option<u8>,
    /// `[low, high]`; calls with `low < p < high` are dropped
    pub reject_mod_qual_non_inclusive: Option<Vec<u8>>,
    pub trim_read_ends_mod: Option<u64>,
    pub base_qual_filter_mod: Option<u8>,
    pub mod_region: Option<String>,
    pub limit: Option<f64>,
    pub offset: Option<f64>,
}

impl QueryOptions {
    pub fn new(bam_path: impl Into<String>) -> Self {
        Self { bam_path: bam_path.into(), ..Default::default() }
    }
}

/// Options for `window_reads`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowOptions {
    #[serde(flatten)]
    pub read: QueryOptions,
    pub win: i64,
    pub step: i64,
    #[serde(default)]
    pub win_op: Option<String>,
}

/// Read-level predicates.
#[derive(Debug, Clone)]
pub struct ReadFilter {
    pub min_seq_len: Option<u64>,
    pub min_align_len: Option<i64>,
    /// Empty means every read id passes
    pub read_ids: HashSet<String>,
    /// `None` means every alignment kind passes
    pub kinds: Option<HashSet<AlignmentKind>>,
    pub sampler: Option<Sampler>,
    pub mapq_filter: Option<u8>,
    pub exclude_mapq_unavail: bool,
    pub region: Option<GenomicRegion>,
    pub full_region: bool,
}

/// Call-probability thresholds: keep `p >= min`, and when a rejection range
/// is set also drop `low < p < high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbabilityFilter {
    pub min: u8,
    pub reject: Option<(u8, u8)>,
}

impl ProbabilityFilter {
    /// Builds the filter. A range whose bounds differ by at most one cannot
    /// exclude any integer probability, so it is dropped.
    pub fn new(min: u8, reject: Option<&[u8]>) -> Result<Self> {
        let reject = match reject {
            None => None,
            Some(&[low, high]) => match high.checked_sub(low) {
                None => {
                    return Err(Error::config(
                        "for rejectModQualNonInclusive, please set low < high",
                    ))
                }
                Some(0 | 1) => None,
                Some(_) => Some((low, high)),
            },
            Some(_) => {
                return Err(Error::config(
                    "rejectModQualNonInclusive must be an array of exactly 2 numbers [low, high]",
                ))
            }
        };
        Ok(Self { min, reject })
    }

    #[inline]
    pub fn passes(&self, prob: u8) -> bool {
        prob >= self.min && !self.reject.is_some_and(|(low, high)| low < prob && prob < high)
    }
}

impl fmt::Display for ProbabilityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probabilities >= {}", self.min)?;
        if let Some((low, high)) = self.reject {
            write!(f, " and not between {low} and {high}")?;
        }
        Ok(())
    }
}

/// Modification-level predicates, applied per call while decoding.
#[derive(Debug, Clone, Default)]
pub struct ModFilter {
    pub tag: Option<ModCode>,
    pub strand: Option<ModStrand>,
    pub prob: ProbabilityFilter,
    pub trim_read_ends: u64,
    pub min_base_qual: u8,
    pub region: Option<GenomicRegion>,
}

/// Everything a query needs to know about which reads and calls to keep,
/// checked once before the input is opened.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub reads: ReadFilter,
    pub mods: ModFilter,
    pub threads: NonZeroUsize,
    pub page: Page,
}

fn parse_region(text: Option<&str>) -> Result<Option<GenomicRegion>> {
    text.map(str::parse).transpose()
}

impl TryFrom<&QueryOptions> for FilterSpec {
    type Error = Error;

    fn try_from(opts: &QueryOptions) -> Result<Self> {
        if opts.include_zero_len == Some(true) {
            return Err(Error::config(
                "includeZeroLen=true is not supported due to potential crashes with zero-length sequences",
            ));
        }
        let threads = match opts.threads {
            None => NonZeroUsize::new(DEFAULT_THREADS),
            Some(n) => usize::try_from(n).ok().and_then(NonZeroUsize::new),
        }
        .ok_or_else(|| Error::config("threads must be a positive integer"))?;

        if let Some(f) = opts.sample_fraction {
            if !(0.0..=1.0).contains(&f) {
                return Err(Error::config("sample_fraction must be between 0 and 1"));
            }
        }
        let region = parse_region(opts.region.as_deref())?;
        if opts.full_region.is_some() && region.is_none() {
            return Err(Error::config("fullRegion requires region to be set"));
        }
        let kinds = opts
            .read_filter
            .as_deref()
            .map(|text| {
                text.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|t| !t.is_empty())
                    .map(str::parse)
                    .collect::<Result<HashSet<AlignmentKind>>>()
            })
            .transpose()?;

        let reads = ReadFilter {
            min_seq_len: opts.min_seq_len,
            min_align_len: opts.min_align_len,
            read_ids: opts.read_id_set.iter().flatten().cloned().collect(),
            kinds,
            sampler: opts.sample_fraction.map(|f| Sampler::new(f, opts.sample_seed)),
            mapq_filter: opts.mapq_filter,
            exclude_mapq_unavail: opts.exclude_mapq_unavail.unwrap_or(false),
            region,
            full_region: opts.full_region.unwrap_or(false),
        };

        let mods = ModFilter {
            tag: opts.tag.as_deref().map(str::parse).transpose()?,
            strand: opts.mod_strand.as_deref().map(ModStrand::from_option).transpose()?,
            prob: ProbabilityFilter::new(
                opts.min_mod_qual.unwrap_or(0),
                opts.reject_mod_qual_non_inclusive.as_deref(),
            )?,
            trim_read_ends: opts.trim_read_ends_mod.unwrap_or(0),
            min_base_qual: opts.base_qual_filter_mod.unwrap_or(0),
            region: parse_region(opts.mod_region.as_deref())?,
        };

        let page = Page::from_options(opts.offset, opts.limit)?;
        let spec = Self { reads, mods, threads, page };
        log::debug!("filter spec: {spec:?}");
        Ok(spec)
    }
}

impl FilterSpec {
    /// Builds the spec for `seq_table`, which always needs a region, always
    /// requires full containment and restricts calls to that same region.
    pub fn for_seq_table(opts: &QueryOptions) -> Result<Self> {
        let region = opts
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::config("region parameter is required for seq_table (cannot be empty)"))?;
        if opts.full_region == Some(false) {
            return Err(Error::config(
                "seq_table requires fullRegion to be true (or left unset)",
            ));
        }
        if let Some(mod_region) = &opts.mod_region {
            if mod_region.trim() != region {
                return Err(Error::config(
                    "seq_table requires modRegion to equal region (or be left unset)",
                ));
            }
        }
        let forced = QueryOptions {
            region: Some(region.to_string()),
            full_region: Some(true),
            mod_region: Some(region.to_string()),
            ..opts.clone()
        };
        Self::try_from(&forced)
    }
}

/// How window values are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowOp {
    #[default]
    Density,
    GradDensity,
}

impl std::str::FromStr for WindowOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "density" => Ok(Self::Density),
            "grad_density" => Ok(Self::GradDensity),
            _ => Err(Error::config(format!(
                "win_op must be set to 'density' or 'grad_density', got '{s}'"
            ))),
        }
    }
}

/// Validated window geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub win: NonZeroUsize,
    pub step: NonZeroUsize,
    pub op: WindowOp,
}

impl TryFrom<&WindowOptions> for WindowSpec {
    type Error = Error;

    fn try_from(opts: &WindowOptions) -> Result<Self> {
        let win = usize::try_from(opts.win)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| Error::config("Window size must be > 0"))?;
        let step = usize::try_from(opts.step)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| Error::config("Step size must be > 0"))?;
        let op = opts.win_op.as_deref().map(str::parse).transpose()?.unwrap_or_default();
        Ok(Self { win, step, op })
    }
}
