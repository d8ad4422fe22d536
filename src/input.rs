// src/input.rs

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use url::Url;

use crate::bam::BamSource;
use crate::error::{Error, Result};
use crate::record::ModTriple;
use crate::region::ResolvedRegion;
use crate::sam::SamSource;
use crate::source::{Contig, RecordIter, RecordSource};

/// A `bamPath` resolved into a local path or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
    Path(PathBuf),
    Url(Url),
}

impl InputLocation {
    /// Plain paths are taken as-is. With `treat_as_url`, the text must be a
    /// URL; `file:` URLs become local paths.
    pub fn parse(location: &str, treat_as_url: bool) -> Result<Self> {
        if !treat_as_url {
            return Ok(Self::Path(PathBuf::from(location)));
        }
        let url = Url::parse(location).map_err(|e| Error::config(format!("invalid URL '{location}': {e}")))?;
        if url.scheme() != "file" {
            return Ok(Self::Url(url));
        }
        url.to_file_path()
            .map(Self::Path)
            .map_err(|()| Error::config(format!("invalid file URL '{location}': expected file:///absolute/path")))
    }
}

/// SAM text is read by the line parser; everything else goes through htslib.
fn is_sam_text(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".sam") || name.ends_with(".sam.gz")
}

/// The record source a query opens, picked from the input location.
#[derive(Debug, Clone)]
pub enum InputSource {
    Sam(SamSource),
    Bam(BamSource),
}

impl InputSource {
    pub fn open(location: InputLocation) -> Result<Self> {
        match location {
            InputLocation::Path(path) if is_sam_text(&path) => Ok(Self::Sam(SamSource::open(path)?)),
            InputLocation::Path(path) => Ok(Self::Bam(BamSource::open(path)?)),
            InputLocation::Url(url) => Ok(Self::Bam(BamSource::open_url(url)?)),
        }
    }
}

impl RecordSource for InputSource {
    fn contigs(&self) -> &[Contig] {
        match self {
            Self::Sam(s) => s.contigs(),
            Self::Bam(s) => s.contigs(),
        }
    }

    fn modification_triples(&self, max_records: usize) -> Result<Vec<ModTriple>> {
        match self {
            Self::Sam(s) => s.modification_triples(max_records),
            Self::Bam(s) => s.modification_triples(max_records),
        }
    }

    fn iterate<'a>(self, region: Option<&'a ResolvedRegion>, threads: NonZeroUsize) -> Result<RecordIter<'a>>
    where
        Self: 'a,
    {
        match self {
            Self::Sam(s) => s.iterate(region, threads),
            Self::Bam(s) => s.iterate(region, threads),
        }
    }
}
