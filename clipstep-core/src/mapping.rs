//! Position remapping between two segmentations of the same text.
//!
//! Every function here is total: anything that cannot be mapped lands on 0.

use crate::segment::{SegmentationMode, Unit};

pub fn map_position(
    old_index: usize,
    old_units: &[Unit],
    new_units: &[Unit],
    old_mode: SegmentationMode,
    new_mode: SegmentationMode,
) -> usize {
    let Some(anchor) = old_units.get(old_index) else {
        return 0;
    };
    if new_units.is_empty() {
        return 0;
    }

    match (old_mode, new_mode) {
        (SegmentationMode::Line, SegmentationMode::Paragraph) => {
            containing_unit(new_units, anchor.start_offset).unwrap_or(0)
        }
        _ => nearest_start(new_units, anchor.start_offset),
    }
}

/// First unit whose inclusive `[start, end]` interval holds `offset`.
pub fn containing_unit(units: &[Unit], offset: usize) -> Option<usize> {
    units.iter().position(|unit| unit.contains_offset(offset))
}

/// Unit whose start is closest to `offset`; ties go to the lower index.
pub fn nearest_start(units: &[Unit], offset: usize) -> usize {
    let mut best = 0;
    let mut best_distance = usize::MAX;
    for (index, unit) in units.iter().enumerate() {
        let distance = unit.start_offset.abs_diff(offset);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

/// Unit covering exactly `start..end`.
pub fn find_span(units: &[Unit], start: usize, end: usize) -> Option<usize> {
    units
        .iter()
        .position(|unit| unit.start_offset == start && unit.end_offset == end)
}
