//! # Type Histogram
//!
//! Objects grouped by full type, for the "what's taking all the memory"
//! view. One bucket per full-type id, sorted by total bytes descending.

use crate::dump::Dump;

/// One histogram bucket: a full type with its instance count and byte total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramEntry
{
    /// Index into [`Dump::full_types`].
    pub full_type: usize,
    pub count: u64,
    pub bytes: u64,
}

/// Group all objects by full type, heaviest buckets first. Types with no
/// instances are omitted.
pub fn histogram_by_type(d: &Dump) -> Vec<HistogramEntry>
{
    let mut buckets: Vec<HistogramEntry> = (0..d.full_types.len())
        .map(|id| HistogramEntry {
            full_type: id,
            count: 0,
            bytes: 0,
        })
        .collect();

    for x in d.object_ids() {
        let b = &mut buckets[d.full_type(x).id];
        b.count += 1;
        b.bytes += d.size(x);
    }

    buckets.retain(|b| b.count > 0);
    buckets.sort_by(|a, b| b.bytes.cmp(&a.bytes).then(a.full_type.cmp(&b.full_type)));
    buckets
}
