// src/region.rs

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::source::Contig;

/// A region as written by the caller: `contig`, `contig:start-end` or
/// `contig:start-`. Coordinates are 0-based and the end is exclusive, so
/// `dummyI:0-10` covers ten reference bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicRegion {
    pub contig: String,
    pub start: u64,
    pub end: Option<u64>,
}

/// A region checked against the contig list, with a concrete end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRegion {
    pub contig_id: usize,
    pub contig: String,
    pub start: u64,
    pub end: u64,
}

impl FromStr for GenomicRegion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("region cannot be empty"));
        }
        let Some((contig, range)) = s.rsplit_once(':') else {
            return Ok(Self { contig: s.to_string(), start: 0, end: None });
        };
        if contig.is_empty() {
            return Err(Error::config(format!("region '{s}' has no contig name")));
        }
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| Error::config(format!("region '{s}' must look like contig:start-end")))?;
        let parse = |v: &str| {
            v.replace(',', "")
                .parse::<u64>()
                .map_err(|_| Error::config(format!("invalid coordinate '{v}' in region '{s}'")))
        };
        let start = parse(start)?;
        let end = if end.is_empty() { None } else { Some(parse(end)?) };
        if let Some(e) = end {
            if e <= start {
                return Err(Error::config(format!(
                    "region '{s}' must have start < end"
                )));
            }
        }
        Ok(Self { contig: contig.to_string(), start, end })
    }
}

impl fmt::Display for GenomicRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(e) => write!(f, "{}:{}-{}", self.contig, self.start, e),
            None if self.start == 0 => write!(f, "{}", self.contig),
            None => write!(f, "{}:{}-", self.contig, self.start),
        }
    }
}

impl GenomicRegion {
    /// Checks the region against the contig list. An unknown contig is a
    /// not-found error; an end past the contig is clipped to its length.
    pub fn resolve(&self, contigs: &[Contig]) -> Result<ResolvedRegion> {
        let (contig_id, contig) = contigs
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == self.contig)
            .ok_or_else(|| Error::NotFound(format!("contig '{}' is not in the header", self.contig)))?;
        if self.start >= contig.length {
            return Err(Error::config(format!(
                "region {self} starts beyond the end of {} ({} bp)",
                contig.name, contig.length
            )));
        }
        let end = self.end.map_or(contig.length, |e| e.min(contig.length));
        Ok(ResolvedRegion {
            contig_id,
            contig: contig.name.clone(),
            start: self.start,
            end,
        })
    }
}

impl ResolvedRegion {
    /// True if `[start, end)` on `contig` shares at least one base with the region
    #[inline]
    pub fn overlaps(&self, contig: &str, start: u64, end: u64) -> bool {
        contig == self.contig && start < self.end && self.start < end
    }

    /// True if `[start, end)` on `contig` covers the whole region
    #[inline]
    pub fn is_contained_by(&self, contig: &str, start: u64, end: u64) -> bool {
        contig == self.contig && start <= self.start && end >= self.end
    }

    #[inline]
    pub fn contains_pos(&self, contig: &str, pos: u64) -> bool {
        contig == self.contig && (self.start..self.end).contains(&pos)
    }

    /// True when an insertion placed before reference position `anchor` has
    /// both of its flanking reference bases inside the region.
    pub fn contains_insertion(&self, contig: &str, anchor: u64) -> bool {
        contig == self.contig && self.start < anchor && anchor < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contigs() -> Vec<Contig> {
        vec![Contig::new("dummyI", 22), Contig::new("dummyII", 48)]
    }

    #[test]
    fn test_parse_forms() {
        let r: GenomicRegion = "dummyI:0-10".parse().unwrap();
        assert_eq!(r, GenomicRegion { contig: "dummyI".into(), start: 0, end: Some(10) });
        let r: GenomicRegion = "dummyII".parse().unwrap();
        assert_eq!(r.end, None);
        assert_eq!(r.to_string(), "dummyII");
        let r: GenomicRegion = "chr1:1,000-".parse().unwrap();
        assert_eq!((r.start, r.end), (1000, None));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "dummyI:10-5", "dummyI:a-5", ":1-5", "dummyI:15"] {
            let err = bad.parse::<GenomicRegion>().unwrap_err();
            assert!(err.is_configuration(), "{bad} -> {err}");
        }
    }

    #[test]
    fn test_resolve() {
        let r: GenomicRegion = "dummyII:5-100".parse().unwrap();
        let res = r.resolve(&contigs()).unwrap();
        assert_eq!((res.contig_id, res.start, res.end), (1, 5, 48));

        let missing: GenomicRegion = "chrX:1-2".parse().unwrap();
        assert!(matches!(missing.resolve(&contigs()), Err(Error::NotFound(_))));

        let past: GenomicRegion = "dummyI:30-40".parse().unwrap();
        assert!(past.resolve(&contigs()).unwrap_err().is_configuration());
    }

    #[test]
    fn test_overlap_and_containment() {
        let res = "dummyI:5-10".parse::<GenomicRegion>().unwrap().resolve(&contigs()).unwrap();
        assert!(res.overlaps("dummyI", 9, 17));
        assert!(!res.overlaps("dummyI", 10, 17));
        assert!(!res.overlaps("dummyII", 0, 48));
        assert!(res.is_contained_by("dummyI", 0, 10));
        assert!(!res.is_contained_by("dummyI", 6, 20));
        assert!(res.contains_insertion("dummyI", 6));
        assert!(!res.contains_insertion("dummyI", 5));
        assert!(!res.contains_insertion("dummyI", 10));
        assert!(!res.contains_insertion("dummyII", 6));
        assert!(res.contains_pos("dummyI", 9));
        assert!(!res.contains_pos("dummyI", 10));
    }
}
