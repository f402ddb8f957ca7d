//! # Dominator Tree
//!
//! Immediate dominators over the object graph, rooted at a virtual start
//! node whose children are every root-edge target (data segments, stack
//! frames, other roots). The immediate dominator of an object is the
//! nearest node every path from the roots must pass through, so the bytes
//! dominated by an object are exactly what a collector would reclaim if the
//! object were cut loose.
//!
//! This is the iterative Cooper-Harvey-Kennedy construction: number nodes
//! in postorder from the roots, then intersect dominator chains over the
//! predecessors (taken from the referrer index) in reverse postorder until
//! the fixed point.

use crate::analysis::referrers::ReferrerIndex;
use crate::dump::{Dump, ObjId};
use crate::error::Result;

const UNDEF: u32 = u32::MAX;

/// Immediate-dominator relation plus per-node retained sizes.
pub struct DominatorTree
{
    /// Node count without the virtual start; the start's index is `num`.
    num: usize,
    /// idom per node, `UNDEF` for unreachable nodes. `idom[num]` is the
    /// virtual start itself.
    idom: Vec<u32>,
    /// Postorder number per node; `UNDEF` marks unreachable.
    po_num: Vec<u32>,
    /// Total bytes retained per node; index `num` holds the total for the
    /// whole reachable heap.
    domsize: Vec<u64>,
}

impl DominatorTree
{
    /// Compute dominators for the dump's rooted object graph.
    pub fn build(d: &Dump, refs: &ReferrerIndex) -> Result<DominatorTree>
    {
        let num = d.num_objects();
        let start = num;

        let (roots, is_root) = collect_roots(d);
        let (postorder, po_num) = postorder_from_roots(d, &roots)?;

        // Fixed point: everything starts undefined except the virtual start
        // (its own dominator) and the roots (dominated by the start).
        let mut idom = vec![UNDEF; num + 1];
        idom[start] = start as u32;
        for &r in &roots {
            idom[r.index()] = start as u32;
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &node in postorder.iter().rev() {
                let node = node as usize;
                // Roots have the virtual start as a predecessor; everything
                // else only has its heap referrers.
                let mut new_idom: Option<u32> = is_root[node].then_some(start as u32);
                for p in refs.referrers(ObjId::from_index(node)) {
                    let p = p.index();
                    if po_num[p] == UNDEF || idom[p] == UNDEF {
                        // unreachable or not yet processed
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p as u32,
                        Some(cur) => intersect(p as u32, cur, &idom, &po_num),
                    });
                }
                if let Some(ni) = new_idom {
                    if idom[node] != ni {
                        idom[node] = ni;
                        changed = true;
                    }
                }
            }
        }

        // Postorder guarantees every node is processed before its dominator,
        // so one forward pass accumulates retained sizes bottom-up.
        let mut domsize = vec![0u64; num + 1];
        for &node in &postorder {
            let node = node as usize;
            domsize[node] += d.size(ObjId::from_index(node));
            let dom = idom[node] as usize;
            domsize[dom] += domsize[node];
        }

        Ok(DominatorTree {
            num,
            idom,
            po_num,
            domsize,
        })
    }

    /// Whether any root reaches this object.
    pub fn is_reachable(&self, x: ObjId) -> bool
    {
        self.po_num[x.index()] != UNDEF
    }

    /// The object's immediate dominator; `None` when the object is
    /// unreachable or dominated directly by the roots.
    pub fn idom(&self, x: ObjId) -> Option<ObjId>
    {
        let dom = self.idom[x.index()];
        if dom == UNDEF || dom as usize == self.num {
            return None;
        }
        Some(ObjId::from_index(dom as usize))
    }

    /// Bytes that would become unreachable if `x` were cut: the object
    /// itself plus everything it dominates. Zero for unreachable objects.
    pub fn retained_size(&self, x: ObjId) -> u64
    {
        self.domsize[x.index()]
    }

    /// Total bytes reachable from the roots.
    pub fn total_reachable(&self) -> u64
    {
        self.domsize[self.num]
    }
}

/// Union of all root-edge targets, deduplicated.
fn collect_roots(d: &Dump) -> (Vec<ObjId>, Vec<bool>)
{
    let mut is_root = vec![false; d.num_objects()];
    let mut roots = Vec::new();
    let mut push = |x: ObjId, is_root: &mut Vec<bool>, roots: &mut Vec<ObjId>| {
        if !is_root[x.index()] {
            is_root[x.index()] = true;
            roots.push(x);
        }
    };

    for seg in [d.data.as_ref(), d.bss.as_ref()].into_iter().flatten() {
        for e in &seg.edges {
            push(e.to, &mut is_root, &mut roots);
        }
    }
    for frame in &d.frames {
        for e in &frame.edges {
            push(e.to, &mut is_root, &mut roots);
        }
    }
    for root in &d.other_roots {
        if let Some(e) = &root.edge {
            push(e.to, &mut is_root, &mut roots);
        }
    }
    (roots, is_root)
}

/// Iterative depth-first postorder over the heap graph from the roots.
///
/// Nodes carry a three-state color (unseen, on the stack, done); the work
/// stack holds each node twice, once to expand its children and once to
/// emit it to the postorder.
fn postorder_from_roots(d: &Dump, roots: &[ObjId]) -> Result<(Vec<u32>, Vec<u32>)>
{
    const UNSEEN: u8 = 0;
    const ON_STACK: u8 = 1;
    const DONE: u8 = 2;

    let num = d.num_objects();
    let mut color = vec![UNSEEN; num];
    let mut postorder: Vec<u32> = Vec::new();
    let mut po_num = vec![UNDEF; num + 1];
    let mut stack: Vec<(u32, bool)> = Vec::new();
    let mut scanner = d.scanner();

    for &root in roots {
        if color[root.index()] != UNSEEN {
            continue;
        }
        stack.push((root.index() as u32, false));
        while let Some((node, expand_done)) = stack.pop() {
            let ni = node as usize;
            if expand_done {
                color[ni] = DONE;
                po_num[ni] = postorder.len() as u32;
                postorder.push(node);
                continue;
            }
            if color[ni] != UNSEEN {
                continue;
            }
            color[ni] = ON_STACK;
            stack.push((node, true));
            for e in scanner.edges(ObjId::from_index(ni))? {
                if color[e.to.index()] == UNSEEN {
                    stack.push((e.to.index() as u32, false));
                }
            }
        }
    }

    // The virtual start is processed conceptually last; give it the highest
    // postorder number so dominator-chain walks terminate there.
    po_num[num] = postorder.len() as u32;
    Ok((postorder, po_num))
}

/// Walk both dominator chains up to their first common node, comparing by
/// postorder number.
fn intersect(mut a: u32, mut b: u32, idom: &[u32], po_num: &[u32]) -> u32
{
    while a != b {
        while po_num[a as usize] < po_num[b as usize] {
            a = idom[a as usize];
        }
        while po_num[b as usize] < po_num[a as usize] {
            b = idom[b as usize];
        }
    }
    a
}
