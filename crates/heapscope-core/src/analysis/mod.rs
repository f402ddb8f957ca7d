//! # Derived Analyses
//!
//! Read-only analyses built on top of a linked [`crate::Dump`]:
//!
//! - **`referrers`**: the inverse-edge index, answering "who points at this
//!   object" in a representation sized for the common one-referrer case.
//! - **`dominators`**: the immediate-dominator tree over the rooted object
//!   graph, giving retained sizes ("how many bytes would be freed if this
//!   object were cut").
//! - **`histogram`**: objects grouped by full type into count/byte buckets.
//! - **`reachable`**: total bytes reachable from one object.

pub mod dominators;
pub mod histogram;
pub mod reachable;
pub mod referrers;

pub use dominators::DominatorTree;
pub use histogram::{histogram_by_type, HistogramEntry};
pub use reachable::reachable_bytes;
pub use referrers::{ReferrerIndex, ReferrerSource};
