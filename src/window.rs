// src/window.rs

use crate::mods::{ModCall, ModTable, ModTableEntry};
use crate::options::{WindowOp, WindowSpec};
use crate::record::{AlignmentRecord, QUAL_UNAVAILABLE};
use crate::types::WindowRow;

/// Slides windows over each tag group's surviving calls of one read.
///
/// A window holds `win` consecutive calls of its group and advances by
/// `step` calls. Groups with fewer than `win` calls produce no rows.
pub fn window_read(record: &AlignmentRecord, table: &ModTable, spec: &WindowSpec) -> Vec<WindowRow> {
    table
        .entries()
        .iter()
        .flat_map(|entry| window_group(record, entry, spec))
        .collect()
}

fn window_group(record: &AlignmentRecord, entry: &ModTableEntry, spec: &WindowSpec) -> Vec<WindowRow> {
    let win = spec.win.get();
    let step = spec.step.get();
    let calls = &entry.calls;
    if calls.len() < win {
        return Vec::new();
    }
    let contig = record.mapping().map(|m| m.contig.clone());
    let mut prev = 0.0;
    (0..=calls.len() - win)
        .step_by(step)
        .map(|start| {
            let window = &calls[start..start + win];
            let d = density(window);
            let win_val = match spec.op {
                WindowOp::Density => d,
                WindowOp::GradDensity => d - prev,
            };
            prev = d;
            let (ref_win_start, ref_win_end) = reference_span(window);
            WindowRow {
                contig: ref_win_start.and(contig.clone()),
                ref_win_start,
                ref_win_end,
                read_id: record.read_id().to_string(),
                win_val,
                strand: record.kind().strand(),
                base: entry.triple.base as char,
                mod_strand: entry.triple.strand.as_char(),
                mod_type: entry.triple.code,
                win_start: window[0].seq_pos,
                win_end: window[win - 1].seq_pos + 1,
                basecall_qual: mean_quality(window),
            }
        })
        .collect()
}

/// Fraction of calls at or above the modified threshold
fn density(window: &[ModCall]) -> f64 {
    let modified = window.iter().filter(|c| c.is_modified()).count();
    modified as f64 / window.len() as f64
}

/// Smallest and one-past-largest reference position touched, if any
fn reference_span(window: &[ModCall]) -> (Option<u64>, Option<u64>) {
    let refs = window.iter().filter_map(|c| c.ref_pos);
    let min = refs.clone().min();
    let max = refs.max();
    (min, max.map(|m| m + 1))
}

fn mean_quality(window: &[ModCall]) -> u8 {
    if window.iter().any(|c| c.base_qual == QUAL_UNAVAILABLE) {
        return QUAL_UNAVAILABLE;
    }
    let sum: u32 = window.iter().map(|c| u32::from(c.base_qual)).sum();
    (sum / window.len() as u32) as u8
}
