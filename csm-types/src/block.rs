//! Student state stored per content block.

use std::collections::BTreeMap;

/// Simulated serialized student state of a single block.
///
/// Field names are small numeric strings (`"0"`, `"1"`, ...) so that data written by different
/// virtual users overlaps in shape.
pub type BlockData = BTreeMap<String, String>;

/// Number of syntax characters surrounding a single field: `"k": "v", `.
pub const FIELD_OVERHEAD: usize = 6;

/// Returns the approximate size of `data` when serialized as a JSON object.
///
/// Each field accounts for its key, its value and [`FIELD_OVERHEAD`] syntax characters, plus two
/// characters for the enclosing braces. An empty block has a size of `2`.
pub fn serialized_size(data: &BlockData) -> usize {
    2 + data
        .iter()
        .map(|(key, value)| key.len() + value.len() + FIELD_OVERHEAD)
        .sum::<usize>()
}
