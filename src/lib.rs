// src/lib.rs
pub mod bam;
pub mod cigar;
pub mod error;
pub mod filter;
pub mod input;
pub mod mods;
pub mod options;
pub mod output;
pub mod paginate;
pub mod reconstruct;
pub mod record;
pub mod region;
pub mod sam;
pub mod simulate;
pub mod source;
pub mod types;
pub mod window;

use std::collections::BTreeMap;

pub use crate::error::{Error, Result};
pub use crate::options::{FilterSpec, QueryOptions, WindowOptions, WindowSpec};
pub use crate::simulate::simulate_mod_bam;
pub use crate::types::{BamModRecord, PeekResult, ReadInfoRecord, SeqTableRow, WindowRow};

use crate::filter::FilterPipeline;
use crate::input::{InputLocation, InputSource};
use crate::record::AlignmentRecord;
use crate::reconstruct::reconstruct;
use crate::source::{RecordSource, PEEK_RECORDS};

fn open_location(bam_path: &str, treat_as_url: bool) -> Result<InputSource> {
    InputSource::open(InputLocation::parse(bam_path, treat_as_url)?)
}

fn open_source(opts: &QueryOptions) -> Result<InputSource> {
    open_location(&opts.bam_path, opts.treat_as_url.unwrap_or(false))
}

/// Streams the records of `source` through the read filter and the page,
/// calling `f` on each surviving record. Stops at the first error.
fn run_query<S, T, F>(source: S, spec: &FilterSpec, mut f: F) -> Result<Vec<T>>
where
    S: RecordSource,
    F: FnMut(&FilterPipeline, &AlignmentRecord) -> Result<T>,
{
    let pipeline = FilterPipeline::new(spec, source.contigs())?;
    let region = pipeline.region().cloned();
    let records = source.iterate(region.as_ref(), spec.threads)?;
    let accepted = records.filter(|r| r.as_ref().map_or(true, |rec| pipeline.accepts(rec)));
    spec.page
        .apply(accepted)
        .map(|r| r.and_then(|rec| f(&pipeline, &rec)))
        .collect()
}

/// Contig lengths and the modification types found in the first records.
pub fn peek(bam_path: &str, treat_as_url: bool) -> Result<PeekResult> {
    peek_from(&open_location(bam_path, treat_as_url)?)
}

pub fn peek_from<S: RecordSource>(source: &S) -> Result<PeekResult> {
    let contigs: BTreeMap<String, u64> = source
        .contigs()
        .iter()
        .map(|c| (c.name.clone(), c.length))
        .collect();
    let modifications = source
        .modification_triples(PEEK_RECORDS)?
        .iter()
        .map(|t| t.to_strings())
        .collect();
    Ok(PeekResult { contigs, modifications })
}

/// One summary row per passing read.
pub fn read_info(opts: &QueryOptions) -> Result<Vec<ReadInfoRecord>> {
    let spec = FilterSpec::try_from(opts)?;
    read_info_from(open_source(opts)?, &spec)
}

fn thresholds(spec: &FilterSpec) -> String {
    format!("{}, PHRED base qual >= {}", spec.mods.prob, spec.mods.min_base_qual)
}

pub fn read_info_from<S: RecordSource>(source: S, spec: &FilterSpec) -> Result<Vec<ReadInfoRecord>> {
    let thresholds = thresholds(spec);
    let rows = run_query(source, spec, |pipeline, record| {
        let table = pipeline.decode(record)?;
        Ok(ReadInfoRecord::new(record, &table, &thresholds))
    })?;
    log::info!("read_info: {} reads", rows.len());
    Ok(rows)
}

/// One row per passing read with every surviving modification call.
pub fn bam_mods(opts: &QueryOptions) -> Result<Vec<BamModRecord>> {
    let spec = FilterSpec::try_from(opts)?;
    bam_mods_from(open_source(opts)?, &spec)
}

pub fn bam_mods_from<S: RecordSource>(source: S, spec: &FilterSpec) -> Result<Vec<BamModRecord>> {
    let thresholds = thresholds(spec);
    let rows = run_query(source, spec, |pipeline, record| {
        let mod_table = pipeline.decode(record)?;
        let info = ReadInfoRecord::new(record, &mod_table, &thresholds);
        Ok(BamModRecord { info, mod_table })
    })?;
    log::info!(
        "bam_mods: {} reads, {} calls",
        rows.len(),
        rows.iter().map(|r| r.mod_table.total_calls()).sum::<usize>()
    );
    Ok(rows)
}

/// Windowed modification values as TSV. `limit`/`offset` count reads, so a
/// read's windows are never split across pages.
pub fn window_reads(opts: &WindowOptions) -> Result<String> {
    let spec = FilterSpec::try_from(&opts.read)?;
    let windows = WindowSpec::try_from(opts)?;
    let rows = window_rows_from(open_source(&opts.read)?, &spec, &windows)?;
    output::window_tsv(&rows)
}

pub fn window_rows_from<S: RecordSource>(
    source: S,
    spec: &FilterSpec,
    windows: &WindowSpec,
) -> Result<Vec<WindowRow>> {
    let per_read = run_query(source, spec, |pipeline, record| {
        let table = pipeline.decode(record)?;
        Ok(window::window_read(record, &table, windows))
    })?;
    let reads = per_read.len();
    let rows: Vec<WindowRow> = per_read.into_iter().flatten().collect();
    log::info!("window_reads: {} windows from {reads} reads", rows.len());
    Ok(rows)
}

/// Region-anchored read sequences as TSV (`read_id`, `sequence`, `qualities`).
/// Row order is not guaranteed stable between calls.
pub fn seq_table(opts: &QueryOptions) -> Result<String> {
    let spec = FilterSpec::for_seq_table(opts)?;
    let rows = seq_table_rows_from(open_source(opts)?, &spec)?;
    output::seq_table_tsv(&rows)
}

pub fn seq_table_rows_from<S: RecordSource>(source: S, spec: &FilterSpec) -> Result<Vec<SeqTableRow>> {
    if spec.reads.region.is_none() {
        return Err(Error::config("region parameter is required for seq_table (cannot be empty)"));
    }
    let rows = run_query(source, spec, |pipeline, record| {
        let table = pipeline.decode(record)?;
        let region = pipeline
            .region()
            .ok_or_else(|| Error::config("seq_table needs a resolved region"))?;
        Ok(reconstruct(record, region, &table.modified_positions()).map(|r| SeqTableRow {
            read_id: record.read_id().to_string(),
            sequence: r.sequence,
            qualities: r.qualities,
        }))
    })?;
    let rows: Vec<SeqTableRow> = rows.into_iter().flatten().collect();
    log::info!("seq_table: {} reads", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::cigar::Cigar;
    use crate::record::{
        AlignmentKind, AlignmentOutcome, Mapping, ModCode, ModStrand, ModTriple, ModificationTagGroup,
    };
    use crate::sam::SamSource;
    use crate::source::{Contig, VecSource};

    const FIXTURE: &str = "data/example_1.sam";

    fn opts() -> QueryOptions {
        QueryOptions::new(FIXTURE)
    }

    fn window_opts(win: i64, step: i64, win_op: Option<&str>) -> WindowOptions {
        WindowOptions { read: opts(), win, step, win_op: win_op.map(String::from) }
    }

    #[test]
    fn test_peek_example() {
        let p = peek(FIXTURE, false).unwrap();
        let contigs: Vec<(&str, u64)> = p.contigs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(contigs, vec![("dummyI", 22), ("dummyII", 48), ("dummyIII", 76)]);
        let mods: Vec<Vec<&str>> = p
            .modifications
            .iter()
            .map(|m| m.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(mods, vec![vec!["G", "-", "7200"], vec!["T", "+", "T"]]);
        assert!(matches!(peek("data/nope.sam", false), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_read_info_shapes() {
        let rows = read_info(&opts()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0].mod_count,
            "T+T:3;(probabilities >= 0, PHRED base qual >= 0)"
        );
        let first = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(first["contig"], "dummyI");
        assert_eq!(first["reference_start"], 9);
        assert_eq!(first["reference_end"], 17);
        assert_eq!(first["alignment_length"], 8);
        assert_eq!(first["alignment_type"], "primary_forward");

        let unmapped = serde_json::to_value(&rows[3]).unwrap();
        assert_eq!(unmapped["alignment_type"], "unmapped");
        assert!(unmapped.get("contig").is_none());
        assert!(unmapped.get("reference_start").is_none());
        assert_eq!(rows[3].mod_count, "T+T:13;G-7200:12;(probabilities >= 0, PHRED base qual >= 0)");
    }

    #[test]
    fn test_exclude_mapq_unavail_empties_result() {
        let o = QueryOptions { mapq_filter: Some(255), exclude_mapq_unavail: Some(true), ..opts() };
        assert!(read_info(&o).unwrap().is_empty());
    }

    fn total_calls(o: &QueryOptions) -> usize {
        bam_mods(o).unwrap().iter().map(|r| r.mod_table.total_calls()).sum()
    }

    #[test]
    fn test_tag_partition_adds_up() {
        let all = total_calls(&opts());
        let t = total_calls(&QueryOptions { tag: Some("T".into()), ..opts() });
        let g = total_calls(&QueryOptions { tag: Some("7200".into()), ..opts() });
        assert!(t > 0 && g > 0);
        assert_eq!(t + g, all);
        assert_eq!(all, 3 + 12 + 9 + 13 + 12);
    }

    #[test]
    fn test_bam_mods_reverse_read_positions() {
        let rows = bam_mods(&QueryOptions { read_filter: Some("primary_reverse".into()), ..opts() }).unwrap();
        assert_eq!(rows.len(), 1);
        let calls = &rows[0].mod_table.entries()[0].calls;
        assert_eq!(calls.len(), 9);
        assert!(calls.windows(2).all(|w| w[0].seq_pos < w[1].seq_pos));
        // every call sits on an A of the stored sequence (a T on the basecalled strand)
        let seq = b"GATTACAGGCATCGATCGGATCCAGTTGCAATG";
        assert!(calls.iter().all(|c| seq[c.seq_pos as usize] == b'A'));
        assert!(calls.iter().all(|c| c.ref_pos == Some(3 + c.seq_pos)));
    }

    #[test]
    fn test_reject_range_removes_all_interior_calls() {
        let o = QueryOptions { reject_mod_qual_non_inclusive: Some(vec![0, 255]), ..opts() };
        assert_eq!(total_calls(&o), 0);
        let o = QueryOptions { reject_mod_qual_non_inclusive: Some(vec![50, 51]), ..opts() };
        assert_eq!(total_calls(&o), total_calls(&opts()));
    }

    #[test]
    fn test_pagination_reassembles_read_info() {
        let full: Vec<String> = read_info(&opts()).unwrap().into_iter().map(|r| r.read_id).collect();
        let mut paged = Vec::new();
        let mut offset = 0.0;
        loop {
            let page = read_info(&QueryOptions { limit: Some(1.0), offset: Some(offset), ..opts() }).unwrap();
            let short = page.is_empty();
            paged.extend(page.into_iter().map(|r| r.read_id));
            if short {
                break;
            }
            offset += 1.0;
        }
        assert_eq!(paged, full);
    }

    #[test]
    fn test_seeded_sampling_reproduces() {
        let o = QueryOptions { sample_fraction: Some(0.5), sample_seed: Some(11), ..opts() };
        let a: Vec<String> = read_info(&o).unwrap().into_iter().map(|r| r.read_id).collect();
        let b: Vec<String> = read_info(&o).unwrap().into_iter().map(|r| r.read_id).collect();
        assert_eq!(a, b);
        let all = read_info(&QueryOptions { sample_fraction: Some(1.0), ..opts() }).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_window_reads_example() {
        let tsv = window_reads(&window_opts(2, 1, None)).unwrap();
        let mut lines = tsv.lines();
        assert!(lines.next().unwrap().starts_with("#contig\tref_win_start"));
        assert_eq!(lines.next().unwrap(), "dummyI\t9\t13\t5d10eb9a-aae1-4db8-8ec6-7ebb34d32575\t0\t+\tT\t+\tT\t0\t4\t255");
    }

    fn page(offset: usize) -> FilterSpec {
        let o = QueryOptions { limit: Some(1.0), offset: Some(offset as f64), ..opts() };
        FilterSpec::try_from(&o).unwrap()
    }

    #[test]
    fn test_window_reads_pages_by_read() {
        let spec = FilterSpec::try_from(&opts()).unwrap();
        let windows = WindowSpec::try_from(&window_opts(2, 1, None)).unwrap();
        let all = window_rows_from(SamSource::open(FIXTURE).unwrap(), &spec, &windows).unwrap();

        let mut paged = Vec::new();
        for offset in 0..5 {
            let rows = window_rows_from(SamSource::open(FIXTURE).unwrap(), &page(offset), &windows).unwrap();
            let ids: HashSet<&str> = rows.iter().map(|r| r.read_id.as_str()).collect();
            assert!(ids.len() <= 1);
            paged.extend(rows);
        }
        // win_val is a float, so compare rendered rows
        let rendered = |rows: &[WindowRow]| -> HashSet<String> {
            output::window_tsv(rows).unwrap().lines().skip(1).map(String::from).collect()
        };
        assert_eq!(paged.len(), all.len());
        assert_eq!(rendered(&paged), rendered(&all));
        // read 0 has 3 calls, so 2 windows
        assert_eq!(all.iter().filter(|r| r.read_id.starts_with("5d10eb9a")).count(), 2);
    }

    #[test]
    fn test_seq_table_pages_reassemble_as_set() {
        let region = || QueryOptions { region: Some("dummyIII:0-76".into()), ..opts() };
        let all: HashSet<SeqTableRow> =
            seq_table_rows_from(SamSource::open(FIXTURE).unwrap(), &FilterSpec::for_seq_table(&region()).unwrap())
                .unwrap()
                .into_iter()
                .collect();
        assert_eq!(all.len(), 1);

        let mut paged = HashSet::new();
        for offset in 0..3 {
            let o = QueryOptions { limit: Some(1.0), offset: Some(offset as f64), ..region() };
            let spec = FilterSpec::for_seq_table(&o).unwrap();
            paged.extend(seq_table_rows_from(SamSource::open(FIXTURE).unwrap(), &spec).unwrap());
        }
        assert_eq!(paged, all);
    }

    #[test]
    fn test_window_config_errors() {
        let err = window_reads(&window_opts(2, 1, Some("invalid_option"))).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("win_op must be set to"));
        assert!(window_reads(&window_opts(0, 1, None)).unwrap_err().is_configuration());
        assert!(window_reads(&window_opts(2, 0, Some("grad_density"))).unwrap_err().is_configuration());
    }

    #[test]
    fn test_seq_table_rows() {
        let o = QueryOptions { region: Some("dummyIII:23-33".into()), ..opts() };
        let tsv = seq_table(&o).unwrap();
        let lines: HashSet<&str> = tsv.lines().skip(1).collect();
        let expected = "a4f36092-b4d5-47a9-813e-c22c3b477a0c\tACGTZAGCCA\t17.28.28.17.22.17.32.28.16.33";
        assert_eq!(lines, HashSet::from([expected]));

        let again = seq_table(&o).unwrap();
        let a: HashSet<&str> = tsv.lines().collect();
        let b: HashSet<&str> = again.lines().collect();
        assert_eq!(a, b);

        let plain = seq_table(&QueryOptions { region: Some("dummyI:9-17".into()), ..opts() }).unwrap();
        assert!(plain.lines().nth(1).unwrap().contains("\tTCGTACGT\t255.255.255"));
    }

    #[test]
    fn test_seq_table_config_errors() {
        assert!(seq_table(&opts()).unwrap_err().is_configuration());
        let o = QueryOptions {
            region: Some("dummyIII:23-33".into()),
            mod_region: Some("dummyIII:23-30".into()),
            ..opts()
        };
        assert!(seq_table(&o).unwrap_err().is_configuration());
        let unknown = QueryOptions { region: Some("chrZ:0-10".into()), ..opts() };
        assert!(matches!(seq_table(&unknown), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_seq_table_marks_modified_insertions() {
        let t = ModTriple::new(b'T', ModStrand::Basecalled, ModCode::Letter('T'));
        let outcome = AlignmentOutcome::Mapped(Mapping {
            contig_id: 0,
            contig: "c".into(),
            start: 0,
            cigar: Cigar::parse("3M2I3M").unwrap(),
        });
        let rec = AlignmentRecord::new(
            "ins",
            AlignmentKind::PrimaryForward,
            outcome,
            b"ACGTTTAC".to_vec(),
            None,
            60,
            vec![ModificationTagGroup::new(t, vec![(0, 250), (0, 250), (0, 250)])],
        )
        .unwrap();
        let source = VecSource::new(vec![Contig::new("c", 10)], vec![rec]);
        let o = QueryOptions { region: Some("c:0-6".into()), ..opts() };
        let rows = seq_table_rows_from(source, &FilterSpec::for_seq_table(&o).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sequence, "ACGzzZAC");
    }

    #[test]
    fn test_queries_read_bam_input() {
        let config = r#"{
            "seed": 3,
            "contigs": {"number": 2, "len_range": [60, 80]},
            "reads": [{"number": 12, "mapq_range": [20, 40], "base_qual_range": [10, 30],
                       "len_range": [0.3, 0.5],
                       "mods": [{"base": "C", "is_strand_plus": true, "mod_code": "m",
                                 "win": [3], "mod_range": [[0.6, 0.9]]}]}]
        }"#;
        let dir = std::env::temp_dir();
        let bam = dir.join(format!("modbam_rs_lib_{}.bam", std::process::id()));
        let fasta = dir.join(format!("modbam_rs_lib_{}.fa", std::process::id()));
        simulate_mod_bam(config, &bam, &fasta).unwrap();
        let path = bam.to_string_lossy().into_owned();

        let p = peek(&path, false).unwrap();
        assert_eq!(p.contigs.len(), 2);
        assert_eq!(p.modifications, vec![["C".to_string(), "+".to_string(), "m".to_string()]]);
        let rows = read_info(&QueryOptions::new(path.clone())).unwrap();
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.mod_count.starts_with("C+m:")));
    }

    #[test]
    fn test_malformed_tags_abort_query() {
        let t = ModTriple::new(b'T', ModStrand::Basecalled, ModCode::Letter('T'));
        let outcome = AlignmentOutcome::Mapped(Mapping {
            contig_id: 0,
            contig: "c".into(),
            start: 0,
            cigar: Cigar::parse("4M").unwrap(),
        });
        let bad = AlignmentRecord::new(
            "bad",
            AlignmentKind::PrimaryForward,
            outcome,
            b"ACGA".to_vec(),
            None,
            60,
            vec![ModificationTagGroup::new(t, vec![(0, 10), (0, 20)])],
        )
        .unwrap();
        let source = VecSource::new(vec![Contig::new("c", 10)], vec![bad]);
        let spec = FilterSpec::try_from(&opts()).unwrap();
        assert!(matches!(read_info_from(source, &spec), Err(Error::Data(_))));
    }
}
