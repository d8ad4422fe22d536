// src/bam.rs

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use rust_htslib::bam::{self, record::Aux, Read};
use rust_htslib::errors::Error as HtsError;
use url::Url;

use crate::cigar::{Cigar, CigarElem, CigarOp};
use crate::error::{Error, Result};
use crate::record::{
    AlignmentKind, AlignmentOutcome, AlignmentRecord, Mapping, ModTriple, ModificationTagGroup,
    QUAL_UNAVAILABLE,
};
use crate::region::ResolvedRegion;
use crate::sam::parse_mod_tags;
use crate::source::{collect_triples, Contig, RecordIter, RecordSource};

/// Where htslib reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BamLocation {
    Path(PathBuf),
    Url(Url),
}

/// Record source backed by htslib. Reads BAM, and also CRAM or SAM since
/// htslib detects the format from the content.
#[derive(Debug, Clone)]
pub struct BamSource {
    location: BamLocation,
    contigs: Vec<Contig>,
}

impl BamSource {
    /// Opens a local file and reads its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_location(BamLocation::Path(path.as_ref().to_path_buf()))
    }

    /// Opens a remote file through htslib's URL handlers.
    pub fn open_url(url: Url) -> Result<Self> {
        Self::from_location(BamLocation::Url(url))
    }

    fn from_location(location: BamLocation) -> Result<Self> {
        let reader = open_reader(&location)?;
        let header = reader.header();
        let contigs: Vec<Contig> = (0..header.target_count())
            .map(|tid| {
                Contig::new(
                    String::from_utf8_lossy(header.tid2name(tid)),
                    header.target_len(tid).unwrap_or(0),
                )
            })
            .collect();
        log::debug!("opened {location:?} with {} contigs", contigs.len());
        Ok(Self { location, contigs })
    }
}

fn open_reader(location: &BamLocation) -> Result<bam::Reader> {
    match location {
        BamLocation::Path(path) => bam::Reader::from_path(path).map_err(|e| match e {
            HtsError::FileNotFound { .. } => Error::NotFound(format!("{}: {e}", path.display())),
            e => Error::Htslib(e),
        }),
        BamLocation::Url(url) => bam::Reader::from_url(url)
            .map_err(|e| Error::NotFound(format!("cannot reach URL {url}: {e}"))),
    }
}

impl RecordSource for BamSource {
    fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    fn modification_triples(&self, max_records: usize) -> Result<Vec<ModTriple>> {
        let mut reader = open_reader(&self.location)?;
        let mut record = bam::Record::new();
        let mut records = Vec::with_capacity(max_records);
        while records.len() < max_records {
            match reader.read(&mut record) {
                None => break,
                Some(res) => {
                    res.map_err(|e| Error::data(format!("cannot decode BAM record: {e}")))?;
                    records.push(convert_record(&record, &self.contigs)?);
                }
            }
        }
        Ok(collect_triples(records.iter()))
    }

    fn iterate<'a>(self, region: Option<&'a ResolvedRegion>, threads: NonZeroUsize) -> Result<RecordIter<'a>>
    where
        Self: 'a,
    {
        let mut reader = open_reader(&self.location)?;
        reader.set_threads(threads.get())?;
        Ok(Box::new(BamRecords {
            reader,
            record: bam::Record::new(),
            contigs: self.contigs,
            region_tid: region.and_then(|r| i32::try_from(r.contig_id).ok()),
            done: false,
        }))
    }
}

/// Reads into one reused htslib record and converts as it goes.
struct BamRecords {
    reader: bam::Reader,
    record: bam::Record,
    contigs: Vec<Contig>,
    region_tid: Option<i32>,
    done: bool,
}

impl Iterator for BamRecords {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.read(&mut self.record) {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(Error::data(format!("cannot decode BAM record: {e}"))));
                }
                Some(Ok(())) => {
                    if self.region_tid.is_some_and(|tid| self.record.tid() != tid) {
                        continue;
                    }
                    return Some(convert_record(&self.record, &self.contigs));
                }
            }
        }
    }
}

fn convert_cigar(record: &bam::Record) -> Cigar {
    use rust_htslib::bam::record::Cigar as Hts;
    let elems = record
        .cigar()
        .iter()
        .map(|c| match *c {
            Hts::Match(n) => CigarElem::new(CigarOp::M, n),
            Hts::Ins(n) => CigarElem::new(CigarOp::I, n),
            Hts::Del(n) => CigarElem::new(CigarOp::D, n),
            Hts::RefSkip(n) => CigarElem::new(CigarOp::N, n),
            Hts::SoftClip(n) => CigarElem::new(CigarOp::S, n),
            Hts::HardClip(n) => CigarElem::new(CigarOp::H, n),
            Hts::Pad(n) => CigarElem::new(CigarOp::P, n),
            Hts::Equal(n) => CigarElem::new(CigarOp::Eq, n),
            Hts::Diff(n) => CigarElem::new(CigarOp::X, n),
        })
        .collect();
    Cigar::new(elems)
}

/// Reads `MM`/`ML` (or the older `Mm`/`Ml`) into tag groups.
fn mod_groups(read_id: &str, record: &bam::Record) -> Result<Vec<ModificationTagGroup>> {
    let mm = match record.aux(b"MM").or_else(|_| record.aux(b"Mm")) {
        Ok(Aux::String(mm)) => mm,
        Ok(_) => return Err(Error::data(format!("read {read_id}: MM must be a string"))),
        Err(_) => return Ok(Vec::new()),
    };
    let ml: Vec<u8> = match record.aux(b"ML").or_else(|_| record.aux(b"Ml")) {
        Ok(Aux::ArrayU8(values)) => values.iter().collect(),
        Ok(_) => return Err(Error::data(format!("read {read_id}: ML must be an array of type C"))),
        Err(_) => Vec::new(),
    };
    parse_mod_tags(read_id, mm, &ml)
}

/// Converts an htslib record, resolving its reference id against `contigs`.
pub fn convert_record(record: &bam::Record, contigs: &[Contig]) -> Result<AlignmentRecord> {
    let read_id = String::from_utf8_lossy(record.qname()).into_owned();
    let kind = AlignmentKind::from_flags(record.flags())?;
    let sequence = record.seq().as_bytes();

    let outcome = if kind.is_unmapped() {
        AlignmentOutcome::Unmapped
    } else {
        let tid = record.tid();
        let (contig_id, contig) = usize::try_from(tid)
            .ok()
            .and_then(|id| contigs.get(id).map(|c| (id, c)))
            .ok_or_else(|| Error::data(format!("read {read_id}: reference id {tid} not in header")))?;
        let start = u64::try_from(record.pos())
            .map_err(|_| Error::data(format!("read {read_id}: invalid position {}", record.pos())))?;
        let cigar = convert_cigar(record);
        if cigar.is_empty() {
            return Err(Error::data(format!("read {read_id}: mapped read without CIGAR")));
        }
        if !sequence.is_empty() && cigar.query_len() != sequence.len() as u64 {
            return Err(Error::data(format!(
                "read {read_id}: CIGAR {cigar} does not match sequence length {}",
                sequence.len()
            )));
        }
        AlignmentOutcome::Mapped(Mapping {
            contig_id,
            contig: contig.name.clone(),
            start,
            cigar,
        })
    };

    let qual = record.qual();
    let qualities = match qual.first() {
        None | Some(&QUAL_UNAVAILABLE) => None,
        Some(_) => Some(qual.to_vec()),
    };
    let mod_groups = mod_groups(&read_id, record)?;
    AlignmentRecord::new(read_id, kind, outcome, sequence, qualities, record.mapq(), mod_groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::SamSource;

    const FIXTURE: &str = "data/example_1.sam";

    fn temp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modbam_rs_bam_{}_{name}", std::process::id()))
    }

    /// Re-encodes the text fixture as binary BAM.
    fn fixture_as_bam(name: &str) -> PathBuf {
        let out = temp(name);
        let mut reader = bam::Reader::from_path(FIXTURE).unwrap();
        let header = bam::Header::from_template(reader.header());
        let mut writer = bam::Writer::from_path(&out, &header, bam::Format::Bam).unwrap();
        for record in reader.records() {
            writer.write(&record.unwrap()).unwrap();
        }
        drop(writer);
        out
    }

    fn all(source: impl RecordSource) -> Vec<AlignmentRecord> {
        source
            .iterate(None, NonZeroUsize::new(2).unwrap())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_bam_matches_sam_text() {
        let path = fixture_as_bam("fixture.bam");
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let bam_src = BamSource::open(&path).unwrap();
        let sam_src = SamSource::open(FIXTURE).unwrap();
        assert_eq!(bam_src.contigs(), sam_src.contigs());
        assert_eq!(
            bam_src.modification_triples(100).unwrap(),
            sam_src.modification_triples(100).unwrap()
        );
        assert_eq!(all(bam_src), all(sam_src));
    }

    #[test]
    fn test_region_skips_other_contigs() {
        let path = fixture_as_bam("region.bam");
        let src = BamSource::open(&path).unwrap();
        let region = ResolvedRegion { contig_id: 2, contig: "dummyIII".into(), start: 0, end: 76 };
        let records: Vec<_> = src
            .iterate(Some(&region), NonZeroUsize::new(1).unwrap())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mapping().unwrap().contig, "dummyIII");
    }

    #[test]
    fn test_unavailable_qualities() {
        let path = fixture_as_bam("qual.bam");
        let records = all(BamSource::open(&path).unwrap());
        assert!(records[0].qualities().is_none());
        assert_eq!(records[1].qualities().unwrap().len(), 48);
        assert_eq!(records[3].mapq(), 255);
        assert_eq!(records[3].mod_groups().len(), 2);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        assert!(matches!(BamSource::open("data/missing.bam"), Err(Error::NotFound(_))));
    }
}
