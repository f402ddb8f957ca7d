//! # heapscope-core
//!
//! Reads a Go 1.3 heap dump, correlates it with the DWARF info of the
//! program that produced it, and exposes a fully linked object graph for
//! inspection: per-object layouts and contents, outgoing edges, referrers,
//! and dominator-based retained sizes.
//!
//! ## Pipeline
//!
//! [`Dump::load`] runs four phases in order:
//!
//! 1. **Decode** (`decode`): pull varint-tagged records out of the dump
//!    file; object bodies stay in the file and are located by offset.
//! 2. **Name** (`link`, `dwarf`): with an executable, replace the dump's
//!    pointer-only field lists with DWARF layouts where the two agree and
//!    label frame/global slots with variable names; otherwise synthesize
//!    generic names.
//! 3. **Expand** (`fulltype`): materialize the complete layout of every
//!    distinct `(type, kind, size)` triple observed in the heap.
//! 4. **Link** (`link`): sort and index objects by address, chain stack
//!    frames, bind goroutines, and realize edges for every root.
//!
//! Derived analyses ([`analysis`]) are built on demand from the immutable
//! result.
//!
//! ## Concurrency
//!
//! A loaded [`Dump`] is never mutated. Queries that need scratch space
//! (object bodies, edge vectors) take it from an [`ObjScanner`], so several
//! threads can query one dump by giving each its own scanner.

pub mod analysis;
mod decode;
pub mod dump;
mod dwarf;
pub mod error;
mod fulltype;
mod link;
pub mod record;

pub use analysis::{DominatorTree, HistogramEntry, ReferrerIndex, ReferrerSource};
// Re-export commonly used types
pub use dump::{Dump, Edge, ObjId, ObjScanner};
pub use error::{DumpError, Result};
pub use fulltype::FullType;
pub use record::{ByteOrder, Field, FieldKind, TypeKind};
