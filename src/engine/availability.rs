use crate::config::PrepBuffer;
use crate::model::*;

// ── Free-range computation ──────────────────────────────────────

/// Free date ranges of a unit inside `window`.
///
/// Every reservation and block is widened by the unit's prep padding, so any
/// stay that fits inside a returned range clears the overlap checks. Stay
/// length and notice rules are not applied here.
pub fn free_ranges(unit: &UnitState, window: &DateSpan, mode: PrepBuffer) -> Vec<DateSpan> {
    let (before, after) = mode.padding(unit.availability.prep_time);
    let search = window.widen(after, before);

    let mut taken: Vec<DateSpan> = unit
        .overlapping(&search)
        .map(|entry| entry.span.widen(before, after))
        .filter(|guarded| guarded.overlaps(window))
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);

    subtract_intervals(&[*window], &taken)
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[DateSpan]) -> Vec<DateSpan> {
    let mut merged: Vec<DateSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[DateSpan], to_remove: &[DateSpan]) -> Vec<DateSpan> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > cursor {
                result.push(DateSpan::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(DateSpan::new(cursor, b.end));
        }
    }

    result
}
