//! # Full-Type Synthesis
//!
//! A [`FullType`] is the canonical, sizeclass-accurate layout attached to
//! every object. Objects sharing a `(type address, kind, size)` triple share
//! one `FullType`; the decoder interns them through [`intern`] as object
//! records stream by, and [`expand_layouts`] fills in the complete field
//! lists once naming has settled.
//!
//! Layout expansion is where the object kinds diverge:
//!
//! - plain objects use their type's field list, or a synthetic raw-bytes
//!   tiling when no type was recorded;
//! - arrays repeat the element layout, prefixing names with the element
//!   index;
//! - channels start with the fixed channel header (length, capacity, and the
//!   send/receive cursors at pointer-size-specific offsets) and then repeat
//!   the element layout;
//! - conservatively-scanned objects get a pointer field at every aligned
//!   word.

use tracing::warn;

use crate::dump::Dump;
use crate::error::{DumpError, Result};
use crate::record::{Field, FieldKind, TypeKind};

/// Dedup key for full types.
pub(crate) type FtKey = (u64, TypeKind, u64);

/// Canonical expanded layout shared by all objects with the same type
/// address, kind, and sizeclass size.
#[derive(Debug, Clone)]
pub struct FullType
{
    /// Dense id; also the index into [`Dump::full_types`].
    pub id: usize,
    /// Index into [`Dump::types`], when the dump recorded a type.
    pub typ: Option<usize>,
    pub kind: TypeKind,
    /// Sizeclass-rounded object size in bytes.
    pub size: u64,
    /// Display name, synthesized from the kind and the type name.
    pub name: String,
    /// Complete layout, ordered by increasing offset, covering every offset
    /// at which a pointer-bearing field may live.
    pub fields: Vec<Field>,
}

/// Create (or look up the prerequisites for) a full type at decode time.
///
/// The field list stays empty here; it is expanded by [`expand_layouts`]
/// after the naming passes have run. Fails when an array or channel object
/// references a type address with no preceding type record.
pub(crate) fn intern(d: &mut Dump, type_addr: u64, kind: TypeKind, size: u64) -> Result<usize>
{
    let typ = match type_addr {
        0 => None,
        addr => match d.type_map.get(&addr) {
            Some(&ti) => Some(ti),
            None => return Err(DumpError::UnknownType { addr }),
        },
    };

    let name = match kind {
        TypeKind::Object => match typ {
            Some(ti) => d.types[ti].name.clone(),
            None => format!("noptr{size}"),
        },
        TypeKind::Array => {
            let t = typ.map(|ti| &d.types[ti]).ok_or_else(|| DumpError::BadTypeKindCombo {
                kind: kind.wire_value(),
                type_desc: "none".to_string(),
            })?;
            if t.size == 0 {
                format!("{{inf}}{}", t.name)
            } else {
                format!("{{{}}}{}", size / t.size, t.name)
            }
        }
        TypeKind::Chan => {
            let t = typ.map(|ti| &d.types[ti]).ok_or_else(|| DumpError::BadTypeKindCombo {
                kind: kind.wire_value(),
                type_desc: "none".to_string(),
            })?;
            if t.size > 0 {
                format!("chan{{{}}}{}", size.saturating_sub(d.hchan_size) / t.size, t.name)
            } else {
                format!("chan{{inf}}{}", t.name)
            }
        }
        TypeKind::Conservative => format!("conservative{size}"),
    };

    let id = d.full_types.len();
    d.full_types.push(FullType {
        id,
        typ,
        kind,
        size,
        name,
        fields: Vec::new(),
    });
    Ok(id)
}

/// Expand every full type's field list from its kind and its type's fields.
///
/// Runs after the naming passes so the expanded lists carry whatever names
/// DWARF (or the synthetic fallback) produced.
pub(crate) fn expand_layouts(d: &mut Dump) -> Result<()>
{
    for i in 0..d.full_types.len() {
        let (typ, kind, size) = {
            let ft = &d.full_types[i];
            (ft.typ, ft.kind, ft.size)
        };
        let fields = match (typ, kind) {
            (None, TypeKind::Conservative) => conservative_layout(size, d.ptr_size),
            (None, TypeKind::Object) => raw_layout(size)?,
            (Some(ti), TypeKind::Object) => d.types[ti].fields.clone(),
            (Some(ti), TypeKind::Array) => {
                let t = &d.types[ti];
                if t.size == 0 {
                    warn!(name = %t.name, "array of zero-size elements has no layout");
                    Vec::new()
                } else {
                    repeat_elements(&t.fields, t.size, 0, size, 0)
                }
            }
            (Some(ti), TypeKind::Chan) => {
                let t = &d.types[ti];
                let mut fields = chan_header_layout(d.ptr_size, d.hchan_size);
                if t.size > 0 {
                    fields.extend(repeat_elements(&t.fields, t.size, d.hchan_size, size, d.hchan_size));
                }
                fields
            }
            (typ, kind) => {
                return Err(DumpError::BadTypeKindCombo {
                    kind: kind.wire_value(),
                    type_desc: typ.map_or_else(|| "none".to_string(), |ti| d.types[ti].name.clone()),
                })
            }
        };
        d.full_types[i].fields = fields;
    }
    Ok(())
}

/// Pointer field at every aligned word: anything might be a pointer.
fn conservative_layout(size: u64, ptr_size: u64) -> Vec<Field>
{
    let mut fields = Vec::new();
    let mut off = 0;
    while off < size {
        fields.push(Field::named(FieldKind::Ptr, off, format!("~{off}")));
        off += ptr_size;
    }
    fields
}

/// Raw-data tiling for typeless allocations: 16-byte chunks with an 8-byte
/// tail when the size calls for one. Contains no pointer-bearing fields.
fn raw_layout(size: u64) -> Result<Vec<Field>>
{
    let mut fields = Vec::new();
    let mut off = 0;
    while off < size {
        let chunk = (size - off).min(16);
        let kind = match chunk {
            16 => FieldKind::Bytes16,
            8 => FieldKind::Bytes8,
            _ => return Err(DumpError::OddRawSize { size }),
        };
        fields.push(Field::named(kind, off, format!("offset {off:x}")));
        off += chunk;
    }
    Ok(fields)
}

/// Repeat an element layout across `[base, total)`, naming each repetition by
/// its element index (dotted onto the element's own field names).
fn repeat_elements(elem_fields: &[Field], elem_size: u64, base: u64, total: u64, index_base: u64) -> Vec<Field>
{
    let mut fields = Vec::new();
    if total < base + elem_size {
        return fields;
    }
    let mut off = base;
    while off <= total - elem_size {
        let idx = (off - index_base) / elem_size;
        for f in elem_fields {
            let name = if f.name.is_empty() {
                format!("{idx}")
            } else {
                format!("{idx}.{}", f.name)
            };
            fields.push(Field::named(f.kind, off + f.offset, name));
        }
        off += elem_size;
    }
    fields
}

/// The channel header: counters at fixed pointer-size-dependent offsets, one
/// word per slot, unnamed slots rendered as `chanhdr`.
fn chan_header_layout(ptr_size: u64, hchan_size: u64) -> Vec<Field>
{
    let named: &[(u64, &str)] = match ptr_size {
        4 => &[(0, "len"), (4, "cap"), (20, "next send index"), (24, "next receive index")],
        _ => &[(0, "len"), (8, "cap"), (32, "next send index"), (40, "next receive index")],
    };
    let kind = if ptr_size == 4 { FieldKind::UInt32 } else { FieldKind::UInt64 };

    let mut fields = Vec::new();
    let mut off = 0;
    while off < hchan_size {
        let name = named
            .iter()
            .find(|&&(o, _)| o == off)
            .map_or("chanhdr", |&(_, name)| name);
        fields.push(Field::named(kind, off, name));
        off += ptr_size;
    }
    fields
}
