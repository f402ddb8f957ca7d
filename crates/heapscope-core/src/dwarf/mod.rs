//! # DWARF Resolution
//!
//! Extracts type layouts and variable locations from the dumped process's
//! executable. The `object` crate handles the container (ELF, Mach-O, and PE
//! all probe through [`object::File::parse`]); `gimli` handles the DWARF
//! sections themselves.
//!
//! Two passes over the debug entries build the type catalog: the first
//! creates a shell per type tag (base, pointer, struct, array, typedef,
//! subroutine), the second links referents (typedef targets, array elements,
//! struct members). A final walk collects variable locations into the three
//! symbol maps (globals by address, locals and arguments by function name
//! plus frame offset). All flattened field lists are materialized here, so
//! everything downstream of the resolver is a read-only lookup.

mod catalog;
mod symbols;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use gimli::{constants, AttributeValue, Dwarf, EndianArcSlice, Reader, RunTimeEndian, SectionId, Unit};
use object::{Object as _, ObjectSection};
use tracing::debug;

pub(crate) use catalog::TypeCatalog;
pub(crate) use symbols::SymbolMaps;

use crate::dump::Dump;
use crate::error::{DumpError, Result};

// Shared reader aliases
pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = Dwarf<OwnedReader>;

/// Everything the naming passes need from the executable.
pub(crate) struct DebugInfo
{
    pub(crate) types: TypeCatalog,
    pub(crate) symbols: SymbolMaps,
}

const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_ranges", &[".debug_ranges", "__debug_ranges"]),
    (".debug_rnglists", &[".debug_rnglists", "__debug_rnglists"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offsets"]),
    (".debug_types", &[".debug_types", "__debug_types"]),
    (".debug_loc", &[".debug_loc", "__debug_loc"]),
    (".debug_loclists", &[".debug_loclists", "__debug_loclists"]),
];

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> Result<Arc<[u8]>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section.uncompressed_data().map_err(|err| DumpError::BadExecutable {
                path: name.to_string(),
                reason: err.to_string(),
            })?;
            return Ok(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
                Cow::Owned(vec) => vec.into(),
            });
        }
    }
    Ok(Arc::<[u8]>::from(Vec::new()))
}

/// Open the executable, load its DWARF sections, and build the type catalog
/// and symbol maps.
pub(crate) fn load_debug_info(exe: &Path, d: &Dump) -> Result<DebugInfo>
{
    let bytes = fs::read(exe)?;
    let file = object::File::parse(&*bytes).map_err(|err| DumpError::BadExecutable {
        path: exe.display().to_string(),
        reason: err.to_string(),
    })?;

    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let mut sections: HashMap<&'static str, Arc<[u8]>> = HashMap::new();
    for (canonical, aliases) in DWARF_SECTIONS {
        sections.insert(canonical, load_section_bytes(&file, aliases)?);
    }
    drop(file);

    let section_reader = |id: SectionId| -> std::result::Result<OwnedReader, gimli::Error> {
        let data = sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        Ok(EndianArcSlice::new(data, endian))
    };
    let dwarf = Dwarf::load(section_reader)?;

    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers.next()? {
        units.push(dwarf.unit(header)?);
    }

    let mut types = TypeCatalog::new(d.ptr_size);
    for unit in &units {
        types.collect_shells(&dwarf, unit)?;
    }
    for unit in &units {
        types.link_referents(&dwarf, unit)?;
    }
    types.finalize()?;

    let symbols = SymbolMaps::build(&dwarf, &units, &types, d)?;
    debug!(types = types.len(), "resolved DWARF info");

    Ok(DebugInfo { types, symbols })
}

/// Global `.debug_info` offset of an entry, our key for cross-references.
pub(super) fn global_offset(unit: &Unit<OwnedReader>, offset: gimli::UnitOffset) -> Option<usize>
{
    offset.to_debug_info_offset(&unit.header).map(|o| o.0)
}

/// Resolve a type-reference attribute to a global `.debug_info` offset.
pub(super) fn attr_type_offset(
    unit: &Unit<OwnedReader>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, OwnedReader>,
) -> Result<Option<usize>>
{
    let Some(attr) = entry.attr(constants::DW_AT_type)? else {
        return Ok(None);
    };
    Ok(match attr.value() {
        AttributeValue::UnitRef(offset) => global_offset(unit, offset),
        AttributeValue::DebugInfoRef(offset) => Some(offset.0),
        _ => None,
    })
}

pub(super) fn attr_name(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, OwnedReader>,
) -> Result<Option<String>>
{
    let Some(attr) = entry.attr(constants::DW_AT_name)? else {
        return Ok(None);
    };
    let reader = dwarf.attr_string(unit, attr.value())?;
    Ok(Some(reader.to_string_lossy()?.into_owned()))
}

pub(super) fn attr_udata(
    entry: &gimli::DebuggingInformationEntry<'_, '_, OwnedReader>,
    at: constants::DwAt,
) -> Result<Option<u64>>
{
    Ok(entry.attr(at)?.and_then(|attr| attr.udata_value()))
}

/// Raw bytes of an expression-valued attribute (exprloc in DWARF 4+, block
/// forms before that).
pub(super) fn attr_expr_bytes(
    entry: &gimli::DebuggingInformationEntry<'_, '_, OwnedReader>,
    at: constants::DwAt,
) -> Result<Option<Vec<u8>>>
{
    let Some(attr) = entry.attr(at)? else {
        return Ok(None);
    };
    Ok(match attr.value() {
        AttributeValue::Exprloc(expr) => Some(expr.0.to_slice()?.into_owned()),
        AttributeValue::Block(block) => Some(block.to_slice()?.into_owned()),
        _ => None,
    })
}

/// Offset encoded as `DW_OP_consts <sleb> DW_OP_plus`; anything else is "no
/// offset expression" and decodes as zero.
pub(super) fn parse_member_offset(bytes: &[u8]) -> u64
{
    if bytes.len() < 2 || bytes[0] != constants::DW_OP_consts.0 || bytes[bytes.len() - 1] != constants::DW_OP_plus.0 {
        return 0;
    }
    let mut reader = gimli::EndianSlice::new(&bytes[1..bytes.len() - 1], gimli::LittleEndian);
    match reader.read_sleb128() {
        Ok(v) if reader.is_empty() && v >= 0 => v as u64,
        _ => 0,
    }
}

/// Frame-relative location: `DW_OP_call_frame_cfa` alone means offset zero;
/// with a trailing `DW_OP_consts <sleb> DW_OP_plus` it means that offset from
/// the CFA. Returns `None` for any other expression shape.
pub(super) fn parse_cfa_offset(bytes: &[u8]) -> Option<i64>
{
    if bytes.is_empty() || bytes[0] != constants::DW_OP_call_frame_cfa.0 {
        return None;
    }
    if bytes.len() == 1 {
        return Some(0);
    }
    if bytes.len() < 3 || bytes[1] != constants::DW_OP_consts.0 || bytes[bytes.len() - 1] != constants::DW_OP_plus.0 {
        return None;
    }
    let mut reader = gimli::EndianSlice::new(&bytes[2..bytes.len() - 1], gimli::LittleEndian);
    match reader.read_sleb128() {
        Ok(v) if reader.is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_member_offset()
    {
        // DW_OP_consts 16 DW_OP_plus
        assert_eq!(parse_member_offset(&[0x11, 16, 0x22]), 16);
        // no expression -> zero
        assert_eq!(parse_member_offset(&[]), 0);
        // unrelated opcode -> zero
        assert_eq!(parse_member_offset(&[0x03, 1, 2, 3]), 0);
    }

    #[test]
    fn test_parse_cfa_offset()
    {
        // bare CFA
        assert_eq!(parse_cfa_offset(&[0x9c]), Some(0));
        // CFA, consts -24, plus  (-24 sleb = 0x68)
        assert_eq!(parse_cfa_offset(&[0x9c, 0x11, 0x68, 0x22]), Some(-24));
        // CFA, consts 8, plus
        assert_eq!(parse_cfa_offset(&[0x9c, 0x11, 0x08, 0x22]), Some(8));
        // not frame-relative
        assert_eq!(parse_cfa_offset(&[0x03, 0x00]), None);
    }
}
