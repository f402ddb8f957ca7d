//! # Reachable Set
//!
//! Breadth-first sweep from one object following heap edges, totalling the
//! bytes of everything it can reach (itself included). Unlike the retained
//! size from the dominator tree, this counts shared structure too.

use std::collections::VecDeque;

use crate::dump::{Dump, ObjId};
use crate::error::Result;

/// Total bytes reachable from `from` through heap edges.
pub fn reachable_bytes(d: &Dump, from: ObjId) -> Result<u64>
{
    let mut seen = vec![false; d.num_objects()];
    let mut queue = VecDeque::new();
    let mut scanner = d.scanner();
    let mut total = 0u64;

    seen[from.index()] = true;
    queue.push_back(from);
    while let Some(x) = queue.pop_front() {
        total += d.size(x);
        for e in scanner.edges(x)? {
            if !seen[e.to.index()] {
                seen[e.to.index()] = true;
                queue.push_back(e.to);
            }
        }
    }
    Ok(total)
}
