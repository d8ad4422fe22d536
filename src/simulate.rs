// src/simulate.rs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rust_htslib::bam::{
    self,
    header::HeaderRecord,
    record::{Aux, AuxArray, Cigar as HtsCigar, CigarString},
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::record::{complement, revcomp, AlignmentKind, ModCode};

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
const MAX_PHRED: u8 = 93;

/// Declarative description of a synthetic data set.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub contigs: ContigConfig,
    pub reads: Vec<ReadGroupConfig>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContigConfig {
    pub number: u32,
    /// Inclusive contig length range in bases
    pub len_range: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadGroupConfig {
    pub number: u32,
    pub mapq_range: [u8; 2],
    pub base_qual_range: [u8; 2],
    /// Read length as a fraction of the contig length
    pub len_range: [f64; 2],
    #[serde(default)]
    pub mods: Vec<ModConfig>,
}

/// Modification probabilities laid out in windows along the basecalled
/// sequence. Window lengths and probability ranges are cycled.
#[derive(Debug, Clone, Deserialize)]
pub struct ModConfig {
    pub base: char,
    pub is_strand_plus: bool,
    pub mod_code: String,
    pub win: Vec<u32>,
    pub mod_range: Vec<[f64; 2]>,
}

fn ordered<T: PartialOrd + std::fmt::Debug>(name: &str, range: &[T; 2]) -> Result<()> {
    if range[0] > range[1] {
        return Err(Error::config(format!("{name} must be [low, high] with low <= high, got {range:?}")));
    }
    Ok(())
}

impl SimulationConfig {
    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::config(format!("invalid JSON config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.contigs.number == 0 {
            return Err(Error::config("contigs.number must be at least 1"));
        }
        ordered("contigs.len_range", &self.contigs.len_range)?;
        if self.contigs.len_range[0] == 0 {
            return Err(Error::config("contig lengths must be positive"));
        }
        for group in &self.reads {
            ordered("mapq_range", &group.mapq_range)?;
            ordered("base_qual_range", &group.base_qual_range)?;
            ordered("len_range", &group.len_range)?;
            if group.base_qual_range[1] > MAX_PHRED {
                return Err(Error::config(format!("base qualities above {MAX_PHRED} cannot be written")));
            }
            if !(group.len_range[0] > 0.0 && group.len_range[1] <= 1.0) {
                return Err(Error::config("len_range fractions must lie in (0, 1]"));
            }
            for m in &group.mods {
                if !"ACGTN".contains(m.base) {
                    return Err(Error::config(format!("invalid modification base '{}'", m.base)));
                }
                m.mod_code.parse::<ModCode>()?;
                if m.win.is_empty() || m.win.contains(&0) {
                    return Err(Error::config("mod win lengths must be positive and non-empty"));
                }
                if m.mod_range.is_empty() {
                    return Err(Error::config("mod_range must not be empty"));
                }
                for r in &m.mod_range {
                    ordered("mod_range", r)?;
                    if r[0] < 0.0 || r[1] > 1.0 {
                        return Err(Error::config("mod_range probabilities must lie in [0, 1]"));
                    }
                }
            }
        }
        Ok(())
    }
}

struct SimContig {
    name: String,
    seq: Vec<u8>,
}

struct SimRead {
    id: String,
    contig: usize,
    start: u64,
    kind: AlignmentKind,
    mapq: u8,
    seq: Vec<u8>,
    quals: Vec<u8>,
    mm: String,
    ml: Vec<u8>,
}

fn random_seq<R: Rng>(rng: &mut R, len: usize) -> Vec<u8> {
    (0..len).map(|_| BASES[rng.random_range(0..4)]).collect()
}

fn random_read_id<R: Rng>(rng: &mut R) -> String {
    let v: u128 = rng.random();
    let h = format!("{v:032x}");
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

/// Builds the `MM` segment and `ML` values for one modification on a read.
fn simulate_mod<R: Rng>(rng: &mut R, basecalled: &[u8], m: &ModConfig, mm: &mut String, ml: &mut Vec<u8>) {
    let base = m.base as u8;
    let target = if m.is_strand_plus { base } else { complement(base) };
    let strand = if m.is_strand_plus { '+' } else { '-' };
    mm.push_str(&format!("{}{}{}?", m.base, strand, m.mod_code));

    let mut window = 0usize;
    let mut window_end = m.win[0] as usize;
    for (i, &b) in basecalled.iter().enumerate() {
        while i >= window_end {
            window += 1;
            window_end += m.win[window % m.win.len()] as usize;
        }
        if target != b'N' && b != target {
            continue;
        }
        let [low, high] = m.mod_range[window % m.mod_range.len()];
        let p = if high > low { rng.random_range(low..=high) } else { low };
        mm.push_str(",0");
        ml.push((p * 255.0).round() as u8);
    }
    mm.push(';');
}

fn generate<R: Rng>(config: &SimulationConfig, rng: &mut R) -> (Vec<SimContig>, Vec<SimRead>) {
    let [clo, chi] = config.contigs.len_range;
    let contigs: Vec<SimContig> = (0..config.contigs.number)
        .map(|i| {
            let len = rng.random_range(clo..=chi) as usize;
            SimContig { name: format!("contig_{i:05}"), seq: random_seq(rng, len) }
        })
        .collect();

    let mut reads = Vec::new();
    for group in &config.reads {
        for _ in 0..group.number {
            let contig = rng.random_range(0..contigs.len());
            let clen = contigs[contig].seq.len();
            let [flo, fhi] = group.len_range;
            let frac = if fhi > flo { rng.random_range(flo..=fhi) } else { flo };
            let len = ((frac * clen as f64).round() as usize).clamp(1, clen);
            let start = rng.random_range(0..=clen - len);
            let kind = if rng.random_bool(0.5) {
                AlignmentKind::PrimaryReverse
            } else {
                AlignmentKind::PrimaryForward
            };
            let seq = contigs[contig].seq[start..start + len].to_vec();
            let basecalled = if kind.is_reverse() { revcomp(&seq) } else { seq.clone() };
            let [qlo, qhi] = group.base_qual_range;
            let quals = (0..len).map(|_| rng.random_range(qlo..=qhi)).collect();
            let [mlo, mhi] = group.mapq_range;

            let mut mm = String::new();
            let mut ml = Vec::new();
            for m in &group.mods {
                simulate_mod(rng, &basecalled, m, &mut mm, &mut ml);
            }
            reads.push(SimRead {
                id: random_read_id(rng),
                contig,
                start: start as u64,
                kind,
                mapq: rng.random_range(mlo..=mhi),
                seq,
                quals,
                mm,
                ml,
            });
        }
    }
    reads.sort_by_key(|r| (r.contig, r.start));
    (contigs, reads)
}

fn create_writer(path: &Path) -> Result<Box<dyn Write>> {
    let f = File::create(path)?;
    let is_gz = path.extension().is_some_and(|ext| ext == "gz");
    Ok(if is_gz {
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(f))
    })
}

/// BAI bin of the 0-based half-open interval `[beg, end)`.
fn reg2bin(beg: i64, end: i64) -> u16 {
    let end = end - 1;
    for (shift, offset) in [(14, 4681), (17, 585), (20, 73), (23, 9), (26, 1)] {
        if beg >> shift == end >> shift {
            return (offset + (beg >> shift)) as u16;
        }
    }
    0
}

fn write_bam(path: &Path, contigs: &[SimContig], reads: &[SimRead]) -> Result<()> {
    let mut header = bam::Header::new();
    header.push_record(HeaderRecord::new(b"HD").push_tag(b"VN", "1.6").push_tag(b"SO", "coordinate"));
    for c in contigs {
        header.push_record(HeaderRecord::new(b"SQ").push_tag(b"SN", &c.name).push_tag(b"LN", c.seq.len()));
    }
    let mut writer = bam::Writer::from_path(path, &header, bam::Format::Bam)?;
    for r in reads {
        let cigar = CigarString(vec![HtsCigar::Match(r.seq.len() as u32)]);
        let mut record = bam::Record::new();
        record.set(r.id.as_bytes(), Some(&cigar), &r.seq, &r.quals);
        record.set_tid(r.contig as i32);
        record.set_pos(r.start as i64);
        record.set_bin(reg2bin(r.start as i64, (r.start + r.seq.len() as u64) as i64));
        record.set_mapq(r.mapq);
        record.set_flags(r.kind.to_flags());
        if !r.mm.is_empty() {
            record.push_aux(b"MM", Aux::String(&r.mm))?;
            let ml: AuxArray<u8> = (&r.ml).into();
            record.push_aux(b"ML", Aux::ArrayU8(ml))?;
        }
        writer.write(&record)?;
    }
    Ok(())
}

fn write_sam(path: &Path, contigs: &[SimContig], reads: &[SimRead]) -> Result<()> {
    let mut w = create_writer(path)?;
    writeln!(w, "@HD\tVN:1.6\tSO:coordinate")?;
    for c in contigs {
        writeln!(w, "@SQ\tSN:{}\tLN:{}", c.name, c.seq.len())?;
    }
    for r in reads {
        let quals: String = r.quals.iter().map(|q| (q + 33) as char).collect();
        write!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}M\t*\t0\t0\t{}\t{}",
            r.id,
            r.kind.to_flags(),
            contigs[r.contig].name,
            r.start + 1,
            r.mapq,
            r.seq.len(),
            String::from_utf8_lossy(&r.seq),
            quals
        )?;
        if !r.mm.is_empty() {
            let ml: Vec<String> = r.ml.iter().map(u8::to_string).collect();
            write!(w, "\tMM:Z:{}\tML:B:C,{}", r.mm, ml.join(","))?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

fn write_fasta(path: &Path, contigs: &[SimContig]) -> Result<()> {
    let mut w = create_writer(path)?;
    for c in contigs {
        writeln!(w, ">{}", c.name)?;
        w.write_all(&c.seq)?;
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

/// Generates contigs and modified reads from a JSON config and writes a
/// coordinate-sorted BAM file plus the matching FASTA reference. Paths ending
/// in `.sam` or `.sam.gz` get SAM text instead.
pub fn simulate_mod_bam<P: AsRef<Path>, Q: AsRef<Path>>(json: &str, bam_path: P, fasta_path: Q) -> Result<()> {
    let config = SimulationConfig::from_json(json)?;
    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_rng(&mut rand::rng()),
    };
    let (contigs, reads) = generate(&config, &mut rng);
    let bam_path = bam_path.as_ref();
    let name = bam_path.to_string_lossy();
    if name.ends_with(".sam") || name.ends_with(".sam.gz") {
        write_sam(bam_path, &contigs, &reads)?;
    } else {
        write_bam(bam_path, &contigs, &reads)?;
    }
    write_fasta(fasta_path.as_ref(), &contigs)?;
    log::info!(
        "simulated {} reads on {} contigs into {}",
        reads.len(),
        contigs.len(),
        bam_path.display()
    );
    Ok(())
}
