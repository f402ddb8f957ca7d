//! # DWARF Type Catalog
//!
//! Flattens every DWARF type into an ordered field list in dump terms: one
//! entry per scalar/pointer location, offsets relative to the start of the
//! value, dotted names accumulated through struct members and array indexes.
//!
//! Strings, interfaces, and slices are deliberately not flattened into their
//! components; the dump models each as a single field at its base offset,
//! and the catalog matches that so the consistency check in the naming pass
//! can compare like with like.

use std::collections::HashMap;

use gimli::{constants, Unit};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::{attr_expr_bytes, attr_name, attr_type_offset, attr_udata, global_offset, parse_member_offset, OwnedDwarf,
            OwnedReader};
use crate::error::{DumpError, Result};
use crate::record::{join_names, Field, FieldKind};

pub(crate) type TypeRef = usize;

/// Compiler-generated map types are named differently in DWARF than in the
/// runtime's type records; rewrite them so name-based matching works.
static MAP_HDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"hash<(.*),(.*)>").unwrap());
static MAP_BUCKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"bucket<(.*),(.*)>").unwrap());

fn rewrite_type_name(name: &str) -> Option<String>
{
    if let Some(c) = MAP_HDR.captures(name) {
        return Some(format!("map.hdr[{}]{}", &c[1], &c[2]));
    }
    if let Some(c) = MAP_BUCKET.captures(name) {
        return Some(format!("map.bucket[{}]{}", &c[1], &c[2]));
    }
    None
}

#[derive(Debug)]
enum TypeShape
{
    Base
    {
        encoding: constants::DwAte,
    },
    Pointer,
    Subroutine,
    Typedef
    {
        target: Option<TypeRef>,
    },
    Struct
    {
        members: Vec<Member>,
    },
    Array
    {
        elem: Option<TypeRef>,
    },
}

#[derive(Debug, Clone)]
struct Member
{
    name: String,
    offset: u64,
    typ: Option<TypeRef>,
}

#[derive(Debug)]
struct DwarfType
{
    name: String,
    size: u64,
    shape: TypeShape,
    fields: Vec<Field>,
}

/// All DWARF types of the executable, keyed by global `.debug_info` offset
/// and by name, with field lists materialized by [`TypeCatalog::finalize`].
pub(crate) struct TypeCatalog
{
    ptr_size: u64,
    types: Vec<DwarfType>,
    by_offset: HashMap<usize, TypeRef>,
    by_name: HashMap<String, TypeRef>,
}

impl TypeCatalog
{
    pub(crate) fn new(ptr_size: u64) -> TypeCatalog
    {
        TypeCatalog {
            ptr_size,
            types: Vec::new(),
            by_offset: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize
    {
        self.types.len()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<TypeRef>
    {
        self.by_name.get(name).copied()
    }

    pub(crate) fn by_global_offset(&self, offset: usize) -> Option<TypeRef>
    {
        self.by_offset.get(&offset).copied()
    }

    pub(crate) fn fields(&self, r: TypeRef) -> &[Field]
    {
        &self.types[r].fields
    }

    /// Pass 1: create a shell for every type tag in the unit.
    pub(crate) fn collect_shells(&mut self, dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>) -> Result<()>
    {
        let mut cursor = unit.entries();
        while let Some((_, entry)) = cursor.next_dfs()? {
            let Some(offset) = global_offset(unit, entry.offset()) else {
                continue;
            };
            let name = attr_name(dwarf, unit, entry)?.unwrap_or_default();
            let size = attr_udata(entry, constants::DW_AT_byte_size)?.unwrap_or(0);
            let shape = match entry.tag() {
                constants::DW_TAG_base_type => {
                    let encoding = match entry.attr(constants::DW_AT_encoding)?.map(|a| a.value()) {
                        Some(gimli::AttributeValue::Encoding(e)) => e,
                        Some(v) => constants::DwAte(v.udata_value().unwrap_or(0) as u8),
                        None => constants::DwAte(0),
                    };
                    TypeShape::Base { encoding }
                }
                constants::DW_TAG_pointer_type => TypeShape::Pointer,
                constants::DW_TAG_subroutine_type => TypeShape::Subroutine,
                constants::DW_TAG_typedef => TypeShape::Typedef { target: None },
                constants::DW_TAG_structure_type => TypeShape::Struct { members: Vec::new() },
                constants::DW_TAG_array_type => TypeShape::Array { elem: None },
                _ => continue,
            };
            let name = match &shape {
                TypeShape::Struct { .. } => rewrite_type_name(&name).unwrap_or(name),
                _ => name,
            };
            let size = match shape {
                // pointers and subroutine values are one pointer wide
                TypeShape::Pointer | TypeShape::Subroutine => self.ptr_size,
                _ => size,
            };
            let r = self.types.len();
            self.types.push(DwarfType {
                name,
                size,
                shape,
                fields: Vec::new(),
            });
            self.by_offset.insert(offset, r);
        }
        Ok(())
    }

    /// Pass 2: link typedef targets, array element types, and struct members.
    ///
    /// Member entries follow their struct in DFS order, so a running "current
    /// struct" is enough to attribute them.
    pub(crate) fn link_referents(&mut self, dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>) -> Result<()>
    {
        let mut current_struct: Option<TypeRef> = None;
        let mut cursor = unit.entries();
        while let Some((_, entry)) = cursor.next_dfs()? {
            match entry.tag() {
                constants::DW_TAG_typedef => {
                    let Some(r) = global_offset(unit, entry.offset()).and_then(|o| self.by_offset.get(&o).copied())
                    else {
                        continue;
                    };
                    let target = attr_type_offset(unit, entry)?.and_then(|o| self.by_offset.get(&o).copied());
                    if target.is_none() {
                        return Err(DumpError::CorruptDwarf(format!(
                            "can't find referent for typedef {}",
                            self.types[r].name
                        )));
                    }
                    if let TypeShape::Typedef { target: slot } = &mut self.types[r].shape {
                        *slot = target;
                    }
                }
                constants::DW_TAG_array_type => {
                    let Some(r) = global_offset(unit, entry.offset()).and_then(|o| self.by_offset.get(&o).copied())
                    else {
                        continue;
                    };
                    let elem = attr_type_offset(unit, entry)?.and_then(|o| self.by_offset.get(&o).copied());
                    if let TypeShape::Array { elem: slot } = &mut self.types[r].shape {
                        *slot = elem;
                    }
                }
                constants::DW_TAG_structure_type => {
                    current_struct = global_offset(unit, entry.offset()).and_then(|o| self.by_offset.get(&o).copied());
                }
                constants::DW_TAG_member => {
                    let Some(parent) = current_struct else {
                        continue;
                    };
                    let name = attr_name(dwarf, unit, entry)?.unwrap_or_default();
                    let typ = attr_type_offset(unit, entry)?.and_then(|o| self.by_offset.get(&o).copied());
                    let offset = match attr_udata(entry, constants::DW_AT_data_member_location)? {
                        Some(n) => n,
                        None => match attr_expr_bytes(entry, constants::DW_AT_data_member_location)? {
                            Some(bytes) => parse_member_offset(&bytes),
                            None => 0,
                        },
                    };
                    if let TypeShape::Struct { members } = &mut self.types[parent].shape {
                        members.push(Member { name, offset, typ });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve typedef sizes and materialize every type's flattened field
    /// list. After this the catalog is read-only.
    pub(crate) fn finalize(&mut self) -> Result<()>
    {
        for r in 0..self.types.len() {
            self.types[r].size = self.resolve_size(r, 0)?;
        }
        let mut state = vec![0u8; self.types.len()];
        for r in 0..self.types.len() {
            self.compute_fields(r, &mut state)?;
        }
        for r in 0..self.types.len() {
            if !self.types[r].name.is_empty() {
                self.by_name.entry(self.types[r].name.clone()).or_insert(r);
            }
        }
        Ok(())
    }

    fn resolve_size(&self, r: TypeRef, depth: usize) -> Result<u64>
    {
        if depth > 64 {
            return Err(DumpError::CorruptDwarf(format!("typedef cycle at {}", self.types[r].name)));
        }
        match self.types[r].shape {
            TypeShape::Typedef { target: Some(t) } => self.resolve_size(t, depth + 1),
            TypeShape::Typedef { target: None } => Ok(0),
            _ => Ok(self.types[r].size),
        }
    }

    fn compute_fields(&mut self, r: TypeRef, state: &mut [u8]) -> Result<()>
    {
        match state[r] {
            2 => return Ok(()),
            1 => {
                return Err(DumpError::CorruptDwarf(format!(
                    "value-type cycle through {}",
                    self.types[r].name
                )))
            }
            _ => {}
        }
        state[r] = 1;

        let fields = match &self.types[r].shape {
            TypeShape::Base { encoding } => base_fields(*encoding, self.types[r].size, &self.types[r].name),
            TypeShape::Pointer | TypeShape::Subroutine => vec![Field::new(FieldKind::Ptr, 0)],
            TypeShape::Typedef { target } => match *target {
                Some(t) => {
                    self.compute_fields(t, state)?;
                    self.types[t].fields.clone()
                }
                None => Vec::new(),
            },
            TypeShape::Struct { members } => {
                let members = members.clone();
                self.struct_fields(r, &members, state)?
            }
            TypeShape::Array { elem } => match *elem {
                Some(e) => {
                    self.compute_fields(e, state)?;
                    self.array_fields(r, e)
                }
                None => Vec::new(),
            },
        };

        self.types[r].fields = fields;
        state[r] = 2;
        Ok(())
    }

    fn struct_fields(&mut self, r: TypeRef, members: &[Member], state: &mut [u8]) -> Result<Vec<Field>>
    {
        // Strings and interfaces are opaque single fields; don't look inside.
        match self.types[r].name.as_str() {
            "string" => return Ok(vec![Field::new(FieldKind::String, 0)]),
            "runtime.iface" => return Ok(vec![Field::new(FieldKind::Iface, 0)]),
            "runtime.eface" => return Ok(vec![Field::new(FieldKind::Eface, 0)]),
            _ => {}
        }

        if self.is_slice_shape(members) {
            return Ok(vec![Field::new(FieldKind::Slice, 0)]);
        }

        let mut fields = Vec::new();
        for m in members {
            let Some(mt) = m.typ else {
                warn!(
                    parent = %self.types[r].name,
                    member = %m.name,
                    "struct member without type info; skipping"
                );
                continue;
            };
            self.compute_fields(mt, state)?;
            for f in &self.types[mt].fields {
                fields.push(Field::named(f.kind, m.offset + f.offset, join_names(&m.name, &f.name)));
            }
        }
        fields.sort_by_key(|f| f.offset);
        Ok(fields)
    }

    /// The slice header shape: `{array *T, len uintN, cap uintN}` packed
    /// contiguously. User structs could imitate it, but the runtime's own
    /// types never do.
    fn is_slice_shape(&self, members: &[Member]) -> bool
    {
        if members.len() != 3 {
            return false;
        }
        let (a, l, c) = (&members[0], &members[1], &members[2]);
        if a.name != "array" || l.name != "len" || c.name != "cap" {
            return false;
        }
        let (Some(at), Some(lt), Some(ct)) = (a.typ, l.typ, c.typ) else {
            return false;
        };
        let ptr_width = self.types[at].size;
        if a.offset != 0 || l.offset != ptr_width || c.offset != 2 * ptr_width {
            return false;
        }
        if !matches!(self.types[at].shape, TypeShape::Pointer) {
            return false;
        }
        for t in [lt, ct] {
            match self.types[t].shape {
                TypeShape::Base { encoding } if encoding == constants::DW_ATE_unsigned => {}
                _ => return false,
            }
        }
        true
    }

    fn array_fields(&self, r: TypeRef, elem: TypeRef) -> Vec<Field>
    {
        let elem_size = self.types[elem].size;
        if elem_size == 0 {
            return Vec::new();
        }
        let n = self.types[r].size / elem_size;
        let elem_fields = &self.types[elem].fields;
        let mut fields = Vec::new();
        for i in 0..n {
            for f in elem_fields {
                fields.push(Field::named(
                    f.kind,
                    i * elem_size + f.offset,
                    join_names(&i.to_string(), &f.name),
                ));
            }
        }
        fields
    }
}

fn base_fields(encoding: constants::DwAte, size: u64, name: &str) -> Vec<Field>
{
    let kind = match (encoding, size) {
        (constants::DW_ATE_boolean, _) => FieldKind::Bool,
        (constants::DW_ATE_signed, 1) => FieldKind::SInt8,
        (constants::DW_ATE_unsigned, 1) => FieldKind::UInt8,
        (constants::DW_ATE_signed, 2) => FieldKind::SInt16,
        (constants::DW_ATE_unsigned, 2) => FieldKind::UInt16,
        (constants::DW_ATE_signed, 4) => FieldKind::SInt32,
        (constants::DW_ATE_unsigned, 4) => FieldKind::UInt32,
        (constants::DW_ATE_signed, 8) => FieldKind::SInt64,
        (constants::DW_ATE_unsigned, 8) => FieldKind::UInt64,
        (constants::DW_ATE_float, 4) => FieldKind::Float32,
        (constants::DW_ATE_float, 8) => FieldKind::Float64,
        (constants::DW_ATE_complex_float, 8) => FieldKind::Complex64,
        (constants::DW_ATE_complex_float, 16) => FieldKind::Complex128,
        _ => {
            warn!(%name, encoding = encoding.0, size, "unknown base type encoding; treating as opaque");
            return Vec::new();
        }
    };
    vec![Field::new(kind, 0)]
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_rewrite_map_type_names()
    {
        assert_eq!(
            rewrite_type_name("hash<string,int>").as_deref(),
            Some("map.hdr[string]int")
        );
        assert_eq!(
            rewrite_type_name("bucket<string,int>").as_deref(),
            Some("map.bucket[string]int")
        );
        assert_eq!(rewrite_type_name("main.T"), None);
    }

    #[test]
    fn test_base_fields_widths()
    {
        assert_eq!(base_fields(constants::DW_ATE_boolean, 1, "bool")[0].kind, FieldKind::Bool);
        assert_eq!(base_fields(constants::DW_ATE_signed, 4, "int32")[0].kind, FieldKind::SInt32);
        assert_eq!(base_fields(constants::DW_ATE_unsigned, 8, "uint64")[0].kind, FieldKind::UInt64);
        assert_eq!(base_fields(constants::DW_ATE_float, 8, "float64")[0].kind, FieldKind::Float64);
        assert_eq!(
            base_fields(constants::DW_ATE_complex_float, 16, "complex128")[0].kind,
            FieldKind::Complex128
        );
        assert!(base_fields(constants::DwAte(0), 3, "weird").is_empty());
    }
}
