//! # Symbol Maps
//!
//! Three address-indexed views over DWARF variable entries:
//!
//! - **globals**: absolute address -> field kind and dotted name, through a
//!   sorted map answering "largest key at or below the query";
//! - **locals**: `(function, distance below frame top)` -> variable name;
//! - **arguments**: `(function, offset above the frame base)` -> name, used
//!   to label the outgoing-argument slots of calling frames.
//!
//! Locals and arguments are recognized by call-frame-CFA location
//! expressions; globals by `DW_OP_addr` expressions.

use std::collections::HashMap;

use gimli::{constants, Unit};

use super::{attr_expr_bytes, attr_name, attr_type_offset, parse_cfa_offset, OwnedDwarf, OwnedReader, TypeCatalog};
use crate::dump::{read_ptr, Dump};
use crate::error::Result;
use crate::record::{join_names, Field, FieldKind};

/// Sorted address map: insert `(address, value)` pairs, then ask for the
/// entry with the largest address less than or equal to a query.
pub(crate) struct AddrMap<V>
{
    entries: Vec<(u64, V)>,
}

impl<V> AddrMap<V>
{
    pub(crate) fn from_entries(mut entries: Vec<(u64, V)>) -> AddrMap<V>
    {
        entries.sort_by_key(|e| e.0);
        AddrMap { entries }
    }

    pub(crate) fn lookup(&self, addr: u64) -> Option<(u64, &V)>
    {
        let i = self.entries.partition_point(|e| e.0 <= addr);
        if i == 0 {
            return None;
        }
        let (a, v) = &self.entries[i - 1];
        Some((*a, v))
    }
}

/// Key for the locals and arguments maps: function name plus frame-relative
/// byte offset.
pub(crate) type FrameKey = (String, u64);

pub(crate) struct SymbolMaps
{
    /// Absolute address -> field at that address.
    pub(crate) globals: AddrMap<Field>,
    /// (function, distance below frame top) -> local variable name.
    pub(crate) locals: HashMap<FrameKey, String>,
    /// (function, CFA-positive offset) -> argument name.
    pub(crate) args: HashMap<FrameKey, String>,
}

impl SymbolMaps
{
    /// One walk over all debug entries, tracking the enclosing function name
    /// for frame-relative variables.
    pub(crate) fn build(
        dwarf: &OwnedDwarf,
        units: &[Unit<OwnedReader>],
        types: &TypeCatalog,
        d: &Dump,
    ) -> Result<SymbolMaps>
    {
        let mut globals: Vec<(u64, Field)> = Vec::new();
        let mut locals: HashMap<FrameKey, String> = HashMap::new();
        let mut args: HashMap<FrameKey, String> = HashMap::new();

        for unit in units {
            let mut funcname = String::new();
            let mut cursor = unit.entries();
            while let Some((_, entry)) = cursor.next_dfs()? {
                match entry.tag() {
                    constants::DW_TAG_subprogram => {
                        if let Some(name) = attr_name(dwarf, unit, entry)? {
                            funcname = name;
                        }
                    }
                    constants::DW_TAG_variable => {
                        let Some(name) = attr_name(dwarf, unit, entry)? else {
                            continue;
                        };
                        let Some(loc) = attr_expr_bytes(entry, constants::DW_AT_location)? else {
                            continue;
                        };
                        let typ = attr_type_offset(unit, entry)?.and_then(|o| types.by_global_offset(o));

                        if let Some(addr) = parse_addr_expr(&loc, d) {
                            match typ {
                                None => {
                                    // non-Go symbols (rodata, runtime internals)
                                    // land here; record the bare address
                                    globals.push((addr, Field::named(FieldKind::Ptr, 0, format!("~{name}"))));
                                }
                                Some(t) => {
                                    for f in types.fields(t) {
                                        globals.push((
                                            addr + f.offset,
                                            Field::named(f.kind, 0, join_names(&name, &f.name)),
                                        ));
                                    }
                                }
                            }
                        } else if let Some(offset) = parse_cfa_offset(&loc) {
                            let Some(t) = typ else {
                                continue;
                            };
                            // locals sit below the frame top; key by how far
                            let base = offset.wrapping_neg() as u64;
                            for f in types.fields(t) {
                                locals.insert(
                                    (funcname.clone(), base.wrapping_sub(f.offset)),
                                    join_names(&name, &f.name),
                                );
                            }
                        }
                    }
                    constants::DW_TAG_formal_parameter => {
                        let Some(name) = attr_name(dwarf, unit, entry)? else {
                            continue;
                        };
                        let Some(loc) = attr_expr_bytes(entry, constants::DW_AT_location)? else {
                            continue;
                        };
                        let Some(offset) = parse_cfa_offset(&loc) else {
                            continue;
                        };
                        let Some(t) = attr_type_offset(unit, entry)?.and_then(|o| types.by_global_offset(o)) else {
                            continue;
                        };
                        for f in types.fields(t) {
                            args.insert(
                                (funcname.clone(), offset as u64 + f.offset),
                                join_names(&name, &f.name),
                            );
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(SymbolMaps {
            globals: AddrMap::from_entries(globals),
            locals,
            args,
        })
    }
}

/// `DW_OP_addr <pointer-sized address>`, in the dump's declared byte order.
fn parse_addr_expr(bytes: &[u8], d: &Dump) -> Option<u64>
{
    if bytes.is_empty() || bytes[0] != constants::DW_OP_addr.0 {
        return None;
    }
    let operand = &bytes[1..];
    if (operand.len() as u64) < d.ptr_size {
        return None;
    }
    Some(read_ptr(d.order, d.ptr_size, operand))
}
