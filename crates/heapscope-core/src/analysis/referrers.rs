//! # Referrer Index
//!
//! Inverse edges over the heap graph. Most objects have at most one incoming
//! heap reference, so the index is two-tier: a flat slot per object for the
//! first referrer, and an overflow table for the minority with more. This
//! keeps the whole index near one word per object instead of a vector each.

use std::collections::HashMap;
use std::fmt;

use crate::dump::{Dump, ObjId};
use crate::error::Result;

/// Inverse-edge index over all heap objects.
pub struct ReferrerIndex
{
    /// First observed referrer per object, or `NIL`.
    ref1: Vec<ObjId>,
    /// Additional distinct referrers for objects that have them.
    ref2: HashMap<ObjId, Vec<ObjId>>,
}

impl ReferrerIndex
{
    /// Enumerate every object's edges once and record the inverse.
    ///
    /// Each `(source, target)` pair is recorded at most once: edges of one
    /// source are scanned consecutively, so comparing against the occupied
    /// slot and the last overflow entry is enough to deduplicate.
    pub fn build(d: &Dump) -> Result<ReferrerIndex>
    {
        let mut idx = ReferrerIndex {
            ref1: vec![ObjId::NIL; d.num_objects()],
            ref2: HashMap::new(),
        };
        let mut scanner = d.scanner();
        for x in d.object_ids() {
            for e in scanner.edges(x)? {
                idx.add(e.to, x);
            }
        }
        Ok(idx)
    }

    fn add(&mut self, to: ObjId, from: ObjId)
    {
        let slot = &mut self.ref1[to.index()];
        if slot.is_nil() {
            *slot = from;
            return;
        }
        if *slot == from {
            return;
        }
        let overflow = self.ref2.entry(to).or_default();
        if overflow.last() != Some(&from) {
            overflow.push(from);
        }
    }

    /// Heap objects referring to `x`, first slot then overflow.
    pub fn referrers(&self, x: ObjId) -> impl Iterator<Item = ObjId> + '_
    {
        let first = self.ref1[x.index()];
        let rest = self.ref2.get(&x).map(Vec::as_slice).unwrap_or(&[]);
        (!first.is_nil()).then_some(first).into_iter().chain(rest.iter().copied())
    }

    /// Number of distinct heap referrers of `x`.
    pub fn count(&self, x: ObjId) -> usize
    {
        let first = usize::from(!self.ref1[x.index()].is_nil());
        first + self.ref2.get(&x).map_or(0, Vec::len)
    }
}

/// One source referring to an object: a heap object, a global field, a frame
/// field, or a miscellaneous root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferrerSource
{
    Object(ObjId),
    Global
    {
        name: String,
    },
    Frame
    {
        frame_name: String,
        field_name: String,
    },
    Root
    {
        description: String,
    },
}

impl fmt::Display for ReferrerSource
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ReferrerSource::Object(id) => write!(f, "object #{}", id.index()),
            ReferrerSource::Global { name } => write!(f, "global {name}"),
            ReferrerSource::Frame { frame_name, field_name } => write!(f, "frame {frame_name}.{field_name}"),
            ReferrerSource::Root { description } => write!(f, "{description}"),
        }
    }
}

/// Everything referring to `x`: heap referrers from the index, then global
/// fields, frame fields, and other roots whose realized edges target `x`.
pub fn referrer_sources(d: &Dump, idx: &ReferrerIndex, x: ObjId) -> Vec<ReferrerSource>
{
    let mut out: Vec<ReferrerSource> = idx.referrers(x).map(ReferrerSource::Object).collect();

    for seg in [d.data.as_ref(), d.bss.as_ref()].into_iter().flatten() {
        for e in &seg.edges {
            if e.to == x {
                let name = if e.field_name.is_empty() {
                    format!("~{}", e.from_offset)
                } else {
                    e.field_name.clone()
                };
                out.push(ReferrerSource::Global { name });
            }
        }
    }
    for frame in &d.frames {
        for e in &frame.edges {
            if e.to == x {
                let field_name = if e.field_name.is_empty() {
                    format!("~{}", e.from_offset)
                } else {
                    e.field_name.clone()
                };
                out.push(ReferrerSource::Frame {
                    frame_name: frame.name.clone(),
                    field_name,
                });
            }
        }
    }
    for root in &d.other_roots {
        if let Some(e) = &root.edge {
            if e.to == x {
                out.push(ReferrerSource::Root {
                    description: root.description.clone(),
                });
            }
        }
    }
    out
}
