use super::{ModCall, ModTable};
use crate::cigar::CigarOp;
use crate::error::{Error, Result};
use crate::options::ModFilter;
use crate::record::{complement, AlignmentRecord, Mapping, ModStrand};
use crate::region::ResolvedRegion;

/// For each inserted base, the reference position the insertion sits before.
/// Aligned and clipped bases get `None`.
fn insertion_anchors(m: &Mapping, len: usize) -> Vec<Option<u64>> {
    let mut anchors = vec![None; len];
    let mut q = 0usize;
    let mut r = m.start;
    for e in m.cigar.elems() {
        let n = e.len as usize;
        if e.op == CigarOp::I {
            for slot in anchors.iter_mut().skip(q).take(n) {
                *slot = Some(r);
            }
        }
        if e.op.consumes_query() {
            q += n;
        }
        if e.op.consumes_ref() {
            r += u64::from(e.len);
        }
    }
    anchors
}

/// Expands every tag group of `record` into calls and applies the
/// modification filter.
///
/// Skip counts are walked over the basecalled sequence. For `-` calls the
/// walk visits the complement of the tagged base; `N` visits every base.
/// Positions are reported in stored orientation, so calls on reverse reads
/// are mapped back with `len - 1 - i`.
///
/// With `mod_region`, aligned calls must sit inside it; inserted calls are
/// kept when both flanking reference bases do.
pub fn decode(
    record: &AlignmentRecord,
    filter: &ModFilter,
    mod_region: Option<&ResolvedRegion>,
) -> Result<ModTable> {
    let bc = record.basecalled_sequence();
    let len = bc.len();
    let reverse = record.kind().is_reverse();
    let mapping = record.mapping();
    let ref_positions = mapping
        .map(|m| m.cigar.reference_positions(m.start, len))
        .transpose()?;
    let anchors = match (mapping, mod_region) {
        (Some(m), Some(_)) => insertion_anchors(m, len),
        _ => Vec::new(),
    };
    let trim = usize::try_from(filter.trim_read_ends).unwrap_or(usize::MAX);

    let mut table = ModTable::default();
    for group in record.mod_groups() {
        let triple = group.triple;
        if filter.tag.is_some_and(|t| t != triple.code) {
            continue;
        }
        if filter.strand.is_some_and(|s| s != triple.strand) {
            continue;
        }
        let base = match triple.base {
            b'U' => b'T',
            b => b,
        };
        let target = match triple.strand {
            ModStrand::Basecalled => base,
            ModStrand::Complement => complement(base),
        };
        let mut candidates = bc
            .iter()
            .enumerate()
            .filter(|&(_, &b)| target == b'N' || b == target)
            .map(|(i, _)| i);

        let mut calls = Vec::with_capacity(group.calls.len());
        for &(skip, prob) in &group.calls {
            let i = candidates.nth(skip as usize).ok_or_else(|| {
                Error::data(format!(
                    "read {}: {} calls run past the end of the sequence",
                    record.read_id(),
                    triple
                ))
            })?;
            let stored = if reverse { len - 1 - i } else { i };

            if !filter.prob.passes(prob) {
                continue;
            }
            if trim > 0 && (stored < trim || stored >= len.saturating_sub(trim)) {
                continue;
            }
            let base_qual = record.base_qual(stored);
            if base_qual < filter.min_base_qual {
                continue;
            }
            let ref_pos = ref_positions.as_ref().and_then(|p| p[stored]);
            if let Some(region) = mod_region {
                let inside = match (mapping, ref_pos, anchors.get(stored)) {
                    (Some(m), Some(r), _) => region.contains_pos(&m.contig, r),
                    (Some(m), None, Some(&Some(a))) => region.contains_insertion(&m.contig, a),
                    _ => false,
                };
                if !inside {
                    continue;
                }
            }
            calls.push(ModCall { seq_pos: stored as u64, ref_pos, prob, base_qual, triple });
        }
        log::trace!(
            "read {}: {} kept {} of {} calls",
            record.read_id(),
            triple,
            calls.len(),
            group.calls.len()
        );
        table.push(triple, calls);
    }
    Ok(table)
}
