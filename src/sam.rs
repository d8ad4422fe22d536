// src/sam.rs

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Lines};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use rayon::prelude::*;

use crate::cigar::Cigar;
use crate::error::{Error, Result};
use crate::record::{
    AlignmentKind, AlignmentOutcome, AlignmentRecord, Mapping, ModCode, ModStrand,
    ModTriple, ModificationTagGroup,
};
use crate::region::ResolvedRegion;
use crate::source::{collect_triples, Contig, RecordIter, RecordSource};

/// Lines decoded per worker thread in one batch.
const LINES_PER_THREAD: usize = 64;

type BoxedLines = Lines<Box<dyn BufRead + Send>>;

/// Record source over a SAM text file, plain or gzip-compressed.
#[derive(Debug, Clone)]
pub struct SamSource {
    path: PathBuf,
    contigs: Vec<Contig>,
}

impl SamSource {
    /// Opens a SAM file and reads its `@SQ` header lines.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut contigs = Vec::new();
        for line in open_lines(&path)? {
            let line = line?;
            if !line.starts_with('@') {
                break;
            }
            if let Some(contig) = parse_sq_line(&line)? {
                contigs.push(contig);
            }
        }
        log::debug!("opened {} with {} contigs", path.display(), contigs.len());
        Ok(Self { path, contigs })
    }
}

impl RecordSource for SamSource {
    fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    fn modification_triples(&self, max_records: usize) -> Result<Vec<ModTriple>> {
        let mut records = Vec::with_capacity(max_records);
        for line in open_lines(&self.path)? {
            if records.len() >= max_records {
                break;
            }
            let line = line?;
            if line.is_empty() || line.starts_with('@') {
                continue;
            }
            records.push(parse_record(&line, &self.contigs)?);
        }
        Ok(collect_triples(records.iter()))
    }

    fn iterate<'a>(self, region: Option<&'a ResolvedRegion>, threads: NonZeroUsize) -> Result<RecordIter<'a>>
    where
        Self: 'a,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.get())
            .build()?;
        Ok(Box::new(SamRecords {
            lines: open_lines(&self.path)?,
            contigs: self.contigs,
            region_contig: region.map(|r| r.contig.clone()),
            batch_size: LINES_PER_THREAD * threads.get(),
            pool,
            pending: VecDeque::new(),
            exhausted: false,
        }))
    }
}

/// Lazily decodes SAM lines in batches, one batch at a time, keeping file order.
struct SamRecords {
    lines: BoxedLines,
    contigs: Vec<Contig>,
    region_contig: Option<String>,
    batch_size: usize,
    pool: rayon::ThreadPool,
    pending: VecDeque<Result<AlignmentRecord>>,
    exhausted: bool,
}

impl SamRecords {
    fn fill(&mut self) {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.lines.next() {
                None => {
                    self.exhausted = true;
                    break;
                }
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.pending.push_back(Err(e.into()));
                    break;
                }
                Some(Ok(line)) => {
                    if line.is_empty() || line.starts_with('@') {
                        continue;
                    }
                    if let Some(contig) = &self.region_contig {
                        if line.split('\t').nth(2) != Some(contig.as_str()) {
                            continue;
                        }
                    }
                    batch.push(line);
                }
            }
        }
        let contigs = &self.contigs;
        let decoded: Vec<Result<AlignmentRecord>> = self
            .pool
            .install(|| batch.par_iter().map(|l| parse_record(l, contigs)).collect());
        // errors queued by the line reader come after the batch they interrupted
        let tail = std::mem::take(&mut self.pending);
        self.pending.extend(decoded);
        self.pending.extend(tail);
    }
}

impl Iterator for SamRecords {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && !self.exhausted {
            self.fill();
        }
        self.pending.pop_front()
    }
}

/// Opens a file, decompressing when it ends with `.gz`.
fn open_lines(path: &Path) -> Result<BoxedLines> {
    let f = Error::open_file(path)?;
    let is_gz = path.extension().is_some_and(|ext| ext == "gz");
    let reader: Box<dyn BufRead + Send> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader.lines())
}

fn parse_sq_line(line: &str) -> Result<Option<Contig>> {
    if !line.starts_with("@SQ") {
        return Ok(None);
    }
    let mut name = None;
    let mut length = None;
    for field in line.split('\t').skip(1) {
        if let Some(v) = field.strip_prefix("SN:") {
            name = Some(v.to_string());
        } else if let Some(v) = field.strip_prefix("LN:") {
            length = Some(
                v.parse::<u64>()
                    .map_err(|_| Error::data(format!("invalid contig length in header line: {line}")))?,
            );
        }
    }
    match (name, length) {
        (Some(n), Some(l)) => Ok(Some(Contig::new(n, l))),
        _ => {
            log::warn!("ignoring @SQ line without SN/LN: {line}");
            Ok(None)
        }
    }
}

/// Decodes one SAM record line.
pub fn parse_record(line: &str, contigs: &[Contig]) -> Result<AlignmentRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 11 {
        return Err(Error::data(format!(
            "SAM line has {} fields, expected at least 11",
            fields.len()
        )));
    }
    let read_id = fields[0];
    let flags: u16 = fields[1]
        .parse()
        .map_err(|_| Error::data(format!("read {read_id}: invalid flag '{}'", fields[1])))?;
    let kind = AlignmentKind::from_flags(flags)?;
    let mapq: u8 = fields[4]
        .parse()
        .map_err(|_| Error::data(format!("read {read_id}: invalid MAPQ '{}'", fields[4])))?;

    let outcome = if kind.is_unmapped() {
        AlignmentOutcome::Unmapped
    } else {
        let contig_id = contigs
            .iter()
            .position(|c| c.name == fields[2])
            .ok_or_else(|| Error::data(format!("read {read_id}: contig '{}' not in header", fields[2])))?;
        let pos: u64 = fields[3]
            .parse()
            .ok()
            .filter(|&p| p > 0)
            .ok_or_else(|| Error::data(format!("read {read_id}: invalid position '{}'", fields[3])))?;
        let cigar = Cigar::parse(fields[5])?;
        if cigar.is_empty() {
            return Err(Error::data(format!("read {read_id}: mapped read without CIGAR")));
        }
        AlignmentOutcome::Mapped(Mapping {
            contig_id,
            contig: fields[2].to_string(),
            start: pos - 1,
            cigar,
        })
    };

    let sequence = match fields[9] {
        "*" => Vec::new(),
        s => s.as_bytes().to_vec(),
    };
    let qualities = match fields[10] {
        "*" => None,
        q => Some(
            q.bytes()
                .map(|b| {
                    b.checked_sub(33)
                        .ok_or_else(|| Error::data(format!("read {read_id}: invalid quality character")))
                })
                .collect::<Result<Vec<u8>>>()?,
        ),
    };
    if let (AlignmentOutcome::Mapped(m), false) = (&outcome, sequence.is_empty()) {
        if m.cigar.query_len() != sequence.len() as u64 {
            return Err(Error::data(format!(
                "read {read_id}: CIGAR {} does not match sequence length {}",
                m.cigar,
                sequence.len()
            )));
        }
    }

    let mut mm = None;
    let mut ml: &str = "";
    for aux in &fields[11..] {
        if let Some(v) = aux.strip_prefix("MM:Z:").or_else(|| aux.strip_prefix("Mm:Z:")) {
            mm = Some(v);
        } else if let Some(v) = aux.strip_prefix("ML:B:").or_else(|| aux.strip_prefix("Ml:B:")) {
            ml = v;
        }
    }
    let mod_groups = match mm {
        Some(mm) => parse_mod_tags(read_id, mm, &parse_ml(read_id, ml)?)?,
        None => Vec::new(),
    };

    AlignmentRecord::new(read_id, kind, outcome, sequence, qualities, mapq, mod_groups)
}

/// Parses the body of an `ML:B:C,...` field.
fn parse_ml(read_id: &str, ml: &str) -> Result<Vec<u8>> {
    if ml.is_empty() {
        return Ok(Vec::new());
    }
    let mut parts = ml.split(',');
    if parts.next() != Some("C") {
        return Err(Error::data(format!("read {read_id}: ML must be an array of type C")));
    }
    parts
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.trim()
                .parse::<u8>()
                .map_err(|_| Error::data(format!("read {read_id}: invalid ML value '{p}'")))
        })
        .collect()
}

/// Splits an `MM` string into tag groups and pairs each skip count with its
/// probability from `ML`. Multi-code segments such as `C+mh` interleave their
/// probabilities per position.
pub fn parse_mod_tags(read_id: &str, mm: &str, ml: &[u8]) -> Result<Vec<ModificationTagGroup>> {
    let mut groups = Vec::new();
    let mut ml_idx = 0;
    for segment in mm.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let bad = || Error::data(format!("read {read_id}: malformed MM segment '{segment}'"));
        let mut items = segment.split(',');
        let head = items.next().ok_or_else(bad)?;
        let mut chars = head.chars();
        let base = chars.next().filter(|c| "ACGTUN".contains(*c)).ok_or_else(bad)?;
        let strand = ModStrand::from_char(chars.next().ok_or_else(bad)?)?;
        let code_text = chars.as_str().trim_end_matches(['.', '?']);
        let codes: Vec<ModCode> = if code_text.bytes().all(|b| b.is_ascii_digit()) {
            vec![code_text.parse().map_err(|_| bad())?]
        } else {
            code_text
                .chars()
                .map(|c| c.to_string().parse())
                .collect::<Result<_>>()
                .map_err(|_| bad())?
        };
        if codes.is_empty() {
            return Err(bad());
        }
        let skips = items
            .map(|s| s.trim().parse::<u32>().map_err(|_| bad()))
            .collect::<Result<Vec<u32>>>()?;

        let needed = skips.len() * codes.len();
        let probs = ml.get(ml_idx..ml_idx + needed).ok_or_else(|| {
            Error::data(format!(
                "read {read_id}: ML has {} values but MM needs at least {}",
                ml.len(),
                ml_idx + needed
            ))
        })?;
        ml_idx += needed;
        log::trace!("read {read_id}: segment {head} with {} calls", skips.len());

        let n_codes = codes.len();
        for (k, code) in codes.into_iter().enumerate() {
            let calls = skips
                .iter()
                .zip(probs.iter().skip(k).step_by(n_codes))
                .map(|(&s, &p)| (s, p))
                .collect();
            groups.push(ModificationTagGroup::new(
                ModTriple::new(base as u8, strand, code),
                calls,
            ));
        }
    }
    if ml_idx < ml.len() {
        log::warn!(
            "read {read_id}: ML has {} values, MM uses only {ml_idx}",
            ml.len()
        );
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MAPQ_UNAVAILABLE;

    fn contigs() -> Vec<Contig> {
        vec![Contig::new("dummyI", 22), Contig::new("dummyII", 48)]
    }

    #[test]
    fn test_parse_mapped_record() {
        let line = "r1\t16\tdummyII\t4\t30\t2M1I2M\t*\t0\t0\tACGTA\t+++++\tMM:Z:A+a.,0,1;\tML:B:C,200,10";
        let rec = parse_record(line, &contigs()).unwrap();
        assert_eq!(rec.read_id(), "r1");
        assert_eq!(rec.kind(), AlignmentKind::PrimaryReverse);
        let m = rec.mapping().unwrap();
        assert_eq!((m.contig_id, m.start, m.end()), (1, 3, 7));
        assert_eq!(rec.qualities().unwrap(), &[10, 10, 10, 10, 10]);
        assert_eq!(rec.mod_groups().len(), 1);
        assert_eq!(rec.mod_groups()[0].calls, vec![(0, 200), (1, 10)]);
        assert_eq!(rec.mod_groups()[0].triple.to_string(), "A+a");
    }

    #[test]
    fn test_parse_unmapped_without_mods() {
        let line = "r2\t4\t*\t0\t255\t*\t*\t0\t0\tACGT\t*";
        let rec = parse_record(line, &contigs()).unwrap();
        assert!(rec.mapping().is_none());
        assert!(rec.qualities().is_none());
        assert_eq!(rec.mapq(), MAPQ_UNAVAILABLE);
        assert!(rec.mod_groups().is_empty());
    }

    #[test]
    fn test_parse_record_errors() {
        assert!(parse_record("r\t0\tdummyI", &contigs()).is_err());
        let unknown = "r\t0\tchrX\t1\t5\t4M\t*\t0\t0\tACGT\t*";
        assert!(matches!(parse_record(unknown, &contigs()), Err(Error::Data(_))));
        let bad_cigar = "r\t0\tdummyI\t1\t5\t5M\t*\t0\t0\tACGT\t*";
        assert!(parse_record(bad_cigar, &contigs()).is_err());
    }

    #[test]
    fn test_multi_code_segment_interleaves() {
        let groups = parse_mod_tags("r", "C+mh?,0,2;G-7200,1;", &[10, 20, 30, 40, 50]).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].triple.code, ModCode::Letter('m'));
        assert_eq!(groups[0].calls, vec![(0, 10), (2, 30)]);
        assert_eq!(groups[1].calls, vec![(0, 20), (2, 40)]);
        assert_eq!(groups[2].triple.code, ModCode::ChEBI(7200));
        assert_eq!(groups[2].calls, vec![(1, 50)]);
    }

    #[test]
    fn test_short_ml_is_data_error() {
        let err = parse_mod_tags("r", "T+T,0,0,0;", &[1, 2]).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn test_open_fixture() {
        let src = SamSource::open("data/example_1.sam").unwrap();
        let names: Vec<&str> = src.contigs().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["dummyI", "dummyII", "dummyIII"]);
        let records: Vec<_> = src
            .iterate(None, NonZeroUsize::new(2).unwrap())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].kind(), AlignmentKind::Unmapped);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        assert!(matches!(SamSource::open("data/missing.sam"), Err(Error::NotFound(_))));
    }
}
