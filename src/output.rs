// src/output.rs

use crate::error::{Error, Result};
use crate::types::{SeqTableRow, WindowRow};

pub const WINDOW_HEADER: [&str; 12] = [
    "#contig",
    "ref_win_start",
    "ref_win_end",
    "read_id",
    "win_val",
    "strand",
    "base",
    "mod_strand",
    "mod_type",
    "win_start",
    "win_end",
    "basecall_qual",
];

pub const SEQ_TABLE_HEADER: [&str; 3] = ["read_id", "sequence", "qualities"];

fn coord(v: Option<u64>) -> String {
    v.map_or_else(|| "-1".to_string(), |v| v.to_string())
}

fn tsv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::data(format!("TSV output is not UTF-8: {e}")))
}

/// Renders window rows as TSV, header first. Missing reference values print
/// as `.` (contig) and `-1` (coordinates).
pub fn window_tsv(rows: &[WindowRow]) -> Result<String> {
    let mut w = tsv_writer();
    w.write_record(WINDOW_HEADER)?;
    for r in rows {
        w.write_record([
            r.contig.clone().unwrap_or_else(|| ".".to_string()),
            coord(r.ref_win_start),
            coord(r.ref_win_end),
            r.read_id.clone(),
            r.win_val.to_string(),
            r.strand.to_string(),
            r.base.to_string(),
            r.mod_strand.to_string(),
            r.mod_type.to_string(),
            r.win_start.to_string(),
            r.win_end.to_string(),
            r.basecall_qual.to_string(),
        ])?;
    }
    finish(w)
}

/// Renders seq-table rows as TSV; qualities are joined with `.`.
pub fn seq_table_tsv(rows: &[SeqTableRow]) -> Result<String> {
    let mut w = tsv_writer();
    w.write_record(SEQ_TABLE_HEADER)?;
    for r in rows {
        let quals = r.qualities.iter().map(u8::to_string).collect::<Vec<_>>().join(".");
        w.write_record([r.read_id.as_str(), r.sequence.as_str(), quals.as_str()])?;
    }
    finish(w)
}
