//! # Naming and Linking
//!
//! Two naming passes and one linking pass turn the raw record collections
//! into a navigable graph.
//!
//! **Naming.** With an executable, DWARF field lists replace the dump's
//! pointer-only lists when the two agree (same kind at every dump offset, no
//! extra pointer-bearing DWARF fields); frame and global fields pick up
//! their variable names. Without an executable, everything gets synthetic
//! names. Disagreements are warnings, never fatal: the dump's own field
//! list is the ground truth and is kept.
//!
//! **Linking.** Order matters: sort objects and build the address index,
//! chain frames into call stacks, bind goroutines to their top frames,
//! then realize edges for frames, data segments, other roots, and queued
//! finalizers. Object edges are never stored; they are produced lazily by
//! [`crate::ObjScanner`].

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::dump::{Dump, Edge};
use crate::dwarf::{self, DebugInfo};
use crate::error::{DumpError, Result};
use crate::record::Field;

/// Name types, frame fields, and global fields from the executable's DWARF
/// info. Falls back to the dump's data wherever DWARF disagrees or is silent.
pub(crate) fn name_with_dwarf(d: &mut Dump, exe: &Path) -> Result<()>
{
    let info = dwarf::load_debug_info(exe, d)?;

    name_types(d, &info);

    // Frame naming needs the call chains, which the linker will rebuild
    // later; both constructions are idempotent.
    chain_frames(d);
    bind_goroutines_to_frames(d)?;
    name_frame_fields(d, &info);
    name_global_fields(d, &info);
    Ok(())
}

fn name_types(d: &mut Dump, info: &DebugInfo)
{
    for t in &mut d.types {
        let Some(dt) = info.types.by_name(&t.name) else {
            // Unexported runtime types routinely have no DWARF entry.
            debug!(name = %t.name, "type has no DWARF info");
            continue;
        };
        let df = info.types.fields(dt);

        // The dump's list is the root truth but only covers pointer-bearing
        // offsets and carries no names. Adopt the DWARF list only when it is
        // consistent: every dump field matches in kind and offset, and DWARF
        // adds nothing pointer-bearing beyond them.
        let mut layout: HashMap<u64, &Field> = df.iter().map(|f| (f.offset, f)).collect();
        let mut consistent = true;
        for f in &t.fields {
            match layout.remove(&f.offset) {
                Some(dwarf_field) if dwarf_field.kind == f.kind => {}
                Some(dwarf_field) => {
                    warn!(
                        name = %t.name,
                        offset = f.offset,
                        dump_kind = ?f.kind,
                        dwarf_kind = ?dwarf_field.kind,
                        "dwarf field kind doesn't match dump kind"
                    );
                    consistent = false;
                }
                None => {
                    warn!(name = %t.name, offset = f.offset, "dump field missing from dwarf layout");
                    consistent = false;
                }
            }
        }
        for f in layout.values() {
            if f.kind.is_pointerish() {
                warn!(name = %t.name, field = %f.name, offset = f.offset, "dwarf type has additional pointer field");
                consistent = false;
            }
        }

        if consistent {
            t.fields = df.to_vec();
        } else {
            warn!(name = %t.name, "inconsistent type; keeping dump field list");
        }
    }
}

fn name_frame_fields(d: &mut Dump, info: &DebugInfo)
{
    for gi in 0..d.goroutines.len() {
        let mut child: Option<usize> = None;
        let mut cur = d.goroutines[gi].bos;
        while let Some(fi) = cur {
            let frame_len = d.frames[fi].data.len() as u64;
            let fname = d.frames[fi].name.clone();
            let child_name = child.map(|c| d.frames[c].name.clone());
            for f in &mut d.frames[fi].fields {
                let mut name = info
                    .symbols
                    .locals
                    .get(&(fname.clone(), frame_len.wrapping_sub(f.offset)))
                    .cloned();
                if name.is_none() {
                    // Unnamed slots at the bottom of a frame are usually the
                    // outgoing arguments of the call the child frame is in.
                    if let Some(cn) = &child_name {
                        name = info
                            .symbols
                            .args
                            .get(&(cn.clone(), f.offset))
                            .map(|n| format!("outarg.{n}"));
                    }
                }
                f.name = name.unwrap_or_else(|| format!("~{}", f.offset));
            }
            child = Some(fi);
            cur = d.frames[fi].parent;
        }
    }
}

fn name_global_fields(d: &mut Dump, info: &DebugInfo)
{
    for seg in [d.data.as_mut(), d.bss.as_mut()].into_iter().flatten() {
        for f in &mut seg.fields {
            let addr = seg.addr + f.offset;
            let Some((a, gf)) = info.symbols.globals.lookup(addr) else {
                continue;
            };
            let mut name = gf.name.clone();
            if a != addr {
                // resolved into the middle of a named variable
                name = format!("{name}:{}", addr - a);
            }
            f.kind = gf.kind;
            f.name = name;
        }
    }
}

/// Generic names when no executable is available: `field<i>` on types,
/// `var<i>` on frames, `data<i>`/`bss<i>` on the globals segments.
pub(crate) fn name_fallback(d: &mut Dump)
{
    for t in &mut d.types {
        for (i, f) in t.fields.iter_mut().enumerate() {
            f.name = format!("field{i}");
        }
    }
    for frame in &mut d.frames {
        for (i, f) in frame.fields.iter_mut().enumerate() {
            f.name = format!("var{i}");
        }
    }
    if let Some(data) = &mut d.data {
        for (i, f) in data.fields.iter_mut().enumerate() {
            f.name = format!("data{i}");
        }
    }
    if let Some(bss) = &mut d.bss {
        for (i, f) in bss.fields.iter_mut().enumerate() {
            f.name = format!("bss{i}");
        }
    }
}

/// Connect everything: object index, frame chains, goroutines, and realized
/// root edges. Re-running on an already linked dump produces the same state.
pub(crate) fn link(d: &mut Dump) -> Result<()>
{
    d.build_index();

    chain_frames(d);
    bind_goroutines_to_frames(d)?;

    // goroutine context objects
    for gi in 0..d.goroutines.len() {
        let ctxt = d.find_obj(d.goroutines[gi].ctxt_addr);
        d.goroutines[gi].ctxt = ctxt;
    }

    // frame edges
    for fi in 0..d.frames.len() {
        let data = std::mem::take(&mut d.frames[fi].data);
        let fields = std::mem::take(&mut d.frames[fi].fields);
        let mut edges = Vec::new();
        emit_edges(d, &data, &fields, &mut edges);
        let frame = &mut d.frames[fi];
        frame.data = data;
        frame.fields = fields;
        frame.edges = edges;
    }

    // data/bss edges
    link_segment(d, true);
    link_segment(d, false);

    // other roots
    for ri in 0..d.other_roots.len() {
        let to_addr = d.other_roots[ri].to_addr;
        let x = d.find_obj(to_addr);
        d.other_roots[ri].edge = (!x.is_nil()).then(|| Edge {
            to: x,
            from_offset: 0,
            to_offset: to_addr - d.addr(x),
            field_name: String::new(),
        });
    }

    // queued finalizers own edges to whatever of their four pointers still
    // lands in the heap
    for qi in 0..d.qfinalizers.len() {
        let q = &d.qfinalizers[qi];
        let addrs = [q.obj, q.fn_addr, q.fint, q.ot];
        let mut edges = Vec::new();
        for addr in addrs {
            let x = d.find_obj(addr);
            if !x.is_nil() {
                edges.push(Edge {
                    to: x,
                    from_offset: 0,
                    to_offset: addr - d.addr(x),
                    field_name: String::new(),
                });
            }
        }
        d.qfinalizers[qi].edges = edges;
    }

    debug!(objects = d.num_objects(), frames = d.frames.len(), "linked dump");
    Ok(())
}

fn link_segment(d: &mut Dump, is_data: bool)
{
    let seg = if is_data { d.data.take() } else { d.bss.take() };
    let Some(mut seg) = seg else { return };
    let mut edges = Vec::new();
    emit_edges(d, &seg.data, &seg.fields, &mut edges);
    seg.edges = edges;
    if is_data {
        d.data = Some(seg);
    } else {
        d.bss = Some(seg);
    }
}

/// Frames are keyed by (stack pointer, depth); zero-sized frames make the
/// depth necessary for uniqueness. Parents are found through the recorded
/// child pointer one depth up.
fn chain_frames(d: &mut Dump)
{
    let index: HashMap<(u64, u64), usize> = d
        .frames
        .iter()
        .enumerate()
        .map(|(i, f)| ((f.addr, f.depth), i))
        .collect();

    for fi in 0..d.frames.len() {
        let f = &d.frames[fi];
        if f.depth == 0 {
            continue;
        }
        match index.get(&(f.child_addr, f.depth - 1)) {
            Some(&child) => d.frames[child].parent = Some(fi),
            None => warn!(
                "frame {} (depth {}) has no child frame at sp 0x{:x}",
                f.name, f.depth, f.child_addr
            ),
        }
    }
}

/// Attach each goroutine to its top-of-stack frame and mark every frame on
/// the chain with its owner. A goroutine without its top frame is fatal; the
/// dump is missing part of a stack.
fn bind_goroutines_to_frames(d: &mut Dump) -> Result<()>
{
    let index: HashMap<(u64, u64), usize> = d
        .frames
        .iter()
        .enumerate()
        .map(|(i, f)| ((f.addr, f.depth), i))
        .collect();

    for gi in 0..d.goroutines.len() {
        let g = &d.goroutines[gi];
        let Some(&bos) = index.get(&(g.bos_addr, 0)) else {
            return Err(DumpError::MissingTopFrame {
                addr: g.addr,
                sp: g.bos_addr,
            });
        };
        d.goroutines[gi].bos = Some(bos);
        let mut cur = Some(bos);
        while let Some(fi) = cur {
            d.frames[fi].goroutine = Some(gi);
            cur = d.frames[fi].parent;
        }
    }
    Ok(())
}

/// Interpret a field list against a byte buffer, appending an edge for every
/// pointer that lands inside a heap object. Shared by the lazy per-object
/// scanner and the root-linking passes; edges come out in ascending
/// source-offset order because field lists are offset-sorted.
pub(crate) fn emit_edges(d: &Dump, data: &[u8], fields: &[Field], out: &mut Vec<Edge>)
{
    use crate::record::FieldKind;

    for f in fields {
        if f.offset >= data.len() as u64 {
            // truncated frame data can leave fields past the captured bytes
            continue;
        }
        match f.kind {
            FieldKind::Ptr | FieldKind::String | FieldKind::Slice => {
                append_edge(d, data, f.offset, &f.name, out);
            }
            FieldKind::Eface => {
                let Some(taddr) = read_word(d, data, f.offset) else { continue };
                if taddr == 0 {
                    continue;
                }
                match d.type_map.get(&taddr) {
                    Some(&ti) => {
                        if d.types[ti].eface_ptr {
                            append_edge(d, data, f.offset + d.ptr_size, &f.name, out);
                        }
                    }
                    None => {
                        warn!("eface type 0x{taddr:x} not in type table");
                    }
                }
            }
            FieldKind::Iface => {
                let Some(itab) = read_word(d, data, f.offset) else { continue };
                if itab == 0 {
                    continue;
                }
                match d.itab_map.get(&itab) {
                    Some(true) => append_edge(d, data, f.offset + d.ptr_size, &f.name, out),
                    Some(false) => {}
                    None => {
                        warn!("itab 0x{itab:x} not in itab table");
                    }
                }
            }
            _ => {}
        }
    }
}

/// Requires `data[off..]` to be a pointer; adds an edge if it points into an
/// object.
fn append_edge(d: &Dump, data: &[u8], off: u64, field_name: &str, out: &mut Vec<Edge>)
{
    let Some(p) = read_word(d, data, off) else { return };
    let y = d.find_obj(p);
    if !y.is_nil() {
        out.push(Edge {
            to: y,
            from_offset: off,
            to_offset: p - d.addr(y),
            field_name: field_name.to_string(),
        });
    }
}

fn read_word(d: &Dump, data: &[u8], off: u64) -> Option<u64>
{
    let off = off as usize;
    let n = d.ptr_size as usize;
    if off + n > data.len() {
        return None;
    }
    Some(d.read_ptr(&data[off..]))
}
