//! End-to-end decoding tests over synthetic dump files.

mod common;

use common::{body, ptr64, DumpBuilder, HEAP_END, HEAP_START};
use heapscope_core::{Dump, DumpError, FieldKind, TypeKind};

const KIND_PTR: u64 = 1;
const KIND_IFACE: u64 = 4;
const KIND_EFACE: u64 = 5;

/// Two 16-byte objects, the first pointing at the second.
fn minimal_dump() -> common::TempDump
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "T", false, &[(KIND_PTR, 0)])
        .object(0x10000, 0x100, 0, &body(&[&ptr64(0x10008), &[0u8; 8]]))
        .object(0x10008, 0, 0, &[0u8; 16])
        .eof();
    b.write()
}

#[test]
fn test_minimal_dump_loads()
{
    let dump_file = minimal_dump();
    let d = Dump::load(&dump_file.path, None).expect("load");

    assert_eq!(d.num_objects(), 2);
    assert_eq!(d.addr(d.find_obj(0x10000)), 0x10000);
    assert_eq!(d.ptr_size, 8);
    assert_eq!(d.hchan_size, 96);
    assert_eq!(d.heap_start, HEAP_START);
    assert_eq!(d.heap_end, HEAP_END);
    assert_eq!(d.types.len(), 1);
    assert_eq!(d.types[0].name, "T");
}

#[test]
fn test_minimal_dump_edge()
{
    let dump_file = minimal_dump();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let first = d.find_obj(0x10000);
    let second = d.find_obj(0x10008);
    let edges = d.edges(first).expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].to, second);
    assert_eq!(edges[0].from_offset, 0);
    assert_eq!(edges[0].to_offset, 0);

    // the typeless object has no pointers
    assert!(d.edges(second).expect("edges").is_empty());
}

#[test]
fn test_full_type_dedup()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "T", false, &[(KIND_PTR, 0)])
        .object(0x10000, 0x100, 0, &[0u8; 16])
        .object(0x10010, 0x100, 0, &[0u8; 16])
        .object(0x10020, 0x100, 0, &[0u8; 32]) // same type, different sizeclass
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let a = d.full_type(d.find_obj(0x10000));
    let bft = d.full_type(d.find_obj(0x10010));
    let c = d.full_type(d.find_obj(0x10020));
    assert_eq!(a.id, bft.id);
    assert_ne!(a.id, c.id);
    assert_eq!(d.full_types.len(), 2);
}

#[test]
fn test_interior_pointer()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "T", false, &[(KIND_PTR, 0)])
        .object(0x10000, 0x100, 0, &body(&[&ptr64(0x10008 + 4), &[0u8; 8]]))
        .object(0x10008, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let edges = d.edges(d.find_obj(0x10000)).expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].to, d.find_obj(0x10008));
    assert_eq!(edges[0].to_offset, 4);
}

#[test]
fn test_eface_with_non_pointer_data()
{
    // The eface's type says its data word is not a pointer, so no edge may
    // be emitted no matter what the data word holds.
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "holder", false, &[(KIND_EFACE, 0)])
        .type_record(0x200, 8, "int", false, &[])
        .object(0x10000, 0x100, 0, &body(&[&ptr64(0x200), &ptr64(0x10010)]))
        .object(0x10010, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    assert!(d.edges(d.find_obj(0x10000)).expect("edges").is_empty());
}

#[test]
fn test_eface_with_pointer_data()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "holder", false, &[(KIND_EFACE, 0)])
        .type_record(0x200, 8, "*T", true, &[])
        .object(0x10000, 0x100, 0, &body(&[&ptr64(0x200), &ptr64(0x10010)]))
        .object(0x10010, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let edges = d.edges(d.find_obj(0x10000)).expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].to, d.find_obj(0x10010));
    // the edge leaves from the data word, one pointer past the type word
    assert_eq!(edges[0].from_offset, 8);
}

#[test]
fn test_eface_with_unknown_type_is_skipped()
{
    // a type word pointing outside the type table is tolerated; the field
    // just produces no edge
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "holder", false, &[(KIND_EFACE, 0)])
        .object(0x10000, 0x100, 0, &body(&[&ptr64(0x999), &ptr64(0x10010)]))
        .object(0x10010, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    assert!(d.edges(d.find_obj(0x10000)).expect("edges").is_empty());
}

#[test]
fn test_iface_honors_itab_bit()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 32, "holder", false, &[(KIND_IFACE, 0), (KIND_IFACE, 16)])
        .itab(0x500, true)
        .itab(0x600, false)
        .object(
            0x10000,
            0x100,
            0,
            &body(&[&ptr64(0x500), &ptr64(0x10020), &ptr64(0x600), &ptr64(0x10020)]),
        )
        .object(0x10020, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let edges = d.edges(d.find_obj(0x10000)).expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].from_offset, 8);
    assert_eq!(edges[0].to, d.find_obj(0x10020));
}

#[test]
fn test_conservative_scan()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .object(
            0x10000,
            0,
            127,
            &body(&[&ptr64(0x10020), &ptr64(0xdeadbeef00), &ptr64(0x10030)]),
        )
        .object(0x10020, 0, 0, &[0u8; 16])
        .object(0x10030, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let x = d.find_obj(0x10000);
    assert_eq!(d.full_type(x).kind, TypeKind::Conservative);
    let edges = d.edges(x).expect("edges");
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].from_offset, 0);
    assert_eq!(edges[1].from_offset, 16);
    assert_eq!(edges[0].to, d.find_obj(0x10020));
    assert_eq!(edges[1].to, d.find_obj(0x10030));
}

#[test]
fn test_chan_layout_and_edges()
{
    // 96-byte header plus three 16-byte element slots
    let mut hdr = vec![0u8; 96];
    hdr[0] = 2; // len
    hdr[8] = 3; // cap
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x300, 16, "elem", false, &[(KIND_PTR, 0)])
        .object(
            0x10100,
            0x300,
            2,
            &body(&[&hdr, &ptr64(0x10000), &[0u8; 8], &ptr64(0), &[0u8; 8], &ptr64(0x10010), &[0u8; 8]]),
        )
        .object(0x10000, 0, 0, &[0u8; 16])
        .object(0x10010, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let chan = d.find_obj(0x10100);
    let ft = d.full_type(chan);
    assert_eq!(ft.kind, TypeKind::Chan);
    assert_eq!(ft.name, "chan{3}elem");

    // header pseudo-fields: 12 words, the known four named, the rest chanhdr
    assert_eq!(ft.fields.len(), 12 + 3);
    assert_eq!(ft.fields[0].name, "len");
    assert_eq!(ft.fields[1].name, "cap");
    assert_eq!(ft.fields[2].name, "chanhdr");
    assert_eq!(ft.fields[4].name, "next send index");
    assert_eq!(ft.fields[4].offset, 32);
    assert_eq!(ft.fields[5].name, "next receive index");
    assert_eq!(ft.fields[5].offset, 40);
    assert!(ft.fields[..12].iter().all(|f| f.kind == FieldKind::UInt64));

    // element slots are index-named and offset past the header
    assert_eq!(ft.fields[12].offset, 96);
    assert!(ft.fields[12].name.starts_with('0'));
    assert_eq!(ft.fields[14].offset, 128);

    // only the slots that actually point at objects produce edges
    let edges = d.edges(chan).expect("edges");
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].from_offset, 96);
    assert_eq!(edges[0].to, d.find_obj(0x10000));
    assert_eq!(edges[1].from_offset, 128);
    assert_eq!(edges[1].to, d.find_obj(0x10010));
}

#[test]
fn test_array_of_element_size_yields_one_element()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x300, 16, "elem", false, &[(KIND_PTR, 0)])
        .object(0x10000, 0x300, 1, &body(&[&ptr64(0x10010), &[0u8; 8]]))
        .object(0x10010, 0, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let x = d.find_obj(0x10000);
    let ft = d.full_type(x);
    assert_eq!(ft.kind, TypeKind::Array);
    assert_eq!(ft.name, "{1}elem");
    assert_eq!(ft.fields.len(), 1);
    assert_eq!(d.edges(x).expect("edges").len(), 1);
}

#[test]
fn test_duplicate_type_records_discarded()
{
    let mut b = DumpBuilder::new();
    b.params_default()
        .type_record(0x100, 16, "T", false, &[(KIND_PTR, 0)])
        .type_record(0x100, 32, "T-again", true, &[])
        .object(0x10000, 0x100, 0, &[0u8; 16])
        .eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    assert_eq!(d.types.len(), 1);
    assert_eq!(d.types[0].name, "T");
    assert_eq!(d.types[0].size, 16);
}

#[test]
fn test_typeless_object_gets_raw_layout()
{
    let mut b = DumpBuilder::new();
    b.params_default().object(0x10000, 0, 0, &[0u8; 24]).eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let ft = d.full_type(d.find_obj(0x10000));
    assert_eq!(ft.name, "noptr24");
    assert_eq!(ft.fields.len(), 2);
    assert_eq!(ft.fields[0].kind, FieldKind::Bytes16);
    assert_eq!(ft.fields[1].kind, FieldKind::Bytes8);
    assert!(ft.fields.iter().all(|f| !f.kind.is_pointerish()));
}

#[test]
fn test_find_obj_boundaries()
{
    let dump_file = minimal_dump();
    let d = Dump::load(&dump_file.path, None).expect("load");

    // an object starts exactly at heap_start
    assert!(!d.find_obj(HEAP_START).is_nil());
    // heap_end itself is outside
    assert!(d.find_obj(HEAP_END).is_nil());
    assert!(d.find_obj(HEAP_START - 1).is_nil());
    // gap past the last object
    assert!(d.find_obj(0x10018).is_nil());
    // interior resolution
    assert_eq!(d.find_obj(0x10008 + 7), d.find_obj(0x10008));
}

#[test]
fn test_find_obj_spanning_buckets()
{
    // one object big enough to span several 256-byte buckets
    let mut b = DumpBuilder::new();
    b.params_default().object(0x10000, 0, 0, &vec![0u8; 1024]).eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let x = d.find_obj(0x10000);
    assert!(!x.is_nil());
    // interior pointer far past the first bucket still resolves
    assert_eq!(d.find_obj(0x10000 + 1000), x);
    assert!(d.find_obj(0x10000 + 1024).is_nil());
}

#[test]
fn test_edges_are_deterministic()
{
    let dump_file = minimal_dump();
    let d = Dump::load(&dump_file.path, None).expect("load");
    let x = d.find_obj(0x10000);

    let first = d.edges(x).expect("edges");
    let second = d.edges(x).expect("edges");
    assert_eq!(first, second);

    // a fresh load of the same bytes agrees as well
    let d2 = Dump::load(&dump_file.path, None).expect("load");
    assert_eq!(d2.num_objects(), d.num_objects());
    for x in d.object_ids() {
        assert_eq!(d.addr(x), d2.addr(x));
        assert_eq!(d.size(x), d2.size(x));
        assert_eq!(d.edges(x).expect("edges"), d2.edges(x).expect("edges"));
    }
}

#[test]
fn test_contents_reads_body_bytes()
{
    let dump_file = minimal_dump();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let bytes = d.contents(d.find_obj(0x10000)).expect("contents");
    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[..8], &ptr64(0x10008));
}

#[test]
fn test_fallback_field_names()
{
    let dump_file = minimal_dump();
    let d = Dump::load(&dump_file.path, None).expect("load");

    assert_eq!(d.types[0].fields[0].name, "field0");
    let edges = d.edges(d.find_obj(0x10000)).expect("edges");
    assert_eq!(edges[0].field_name, "field0");
}

#[test]
fn test_bad_header_is_fatal()
{
    let mut b = DumpBuilder::with_raw_header(b"go1.4 heap dump\n");
    b.params_default().eof();
    let dump_file = b.write();
    let err = Dump::load(&dump_file.path, None).unwrap_err();
    assert!(matches!(err, DumpError::BadHeader));
}

#[test]
fn test_unknown_tag_is_fatal()
{
    let mut b = DumpBuilder::new();
    b.params_default();
    b.uvarint(42);
    let dump_file = b.write();
    let err = Dump::load(&dump_file.path, None).unwrap_err();
    assert!(matches!(err, DumpError::UnknownTag { tag: 42, .. }));
}

#[test]
fn test_object_before_params_is_fatal()
{
    let mut b = DumpBuilder::new();
    b.object(0x10000, 0, 0, &[0u8; 16]).eof();
    let dump_file = b.write();
    let err = Dump::load(&dump_file.path, None).unwrap_err();
    assert!(matches!(err, DumpError::MissingParams { .. }));
}

#[test]
fn test_unsupported_pointer_size_is_fatal()
{
    let mut b = DumpBuilder::new();
    b.params(0, 2, 96, HEAP_START, HEAP_END).eof();
    let dump_file = b.write();
    let err = Dump::load(&dump_file.path, None).unwrap_err();
    assert!(matches!(err, DumpError::UnsupportedParams { ptr_size: 2, .. }));
}

#[test]
fn test_unknown_type_reference_is_fatal()
{
    let mut b = DumpBuilder::new();
    b.params_default().object(0x10000, 0x777, 0, &[0u8; 16]).eof();
    let dump_file = b.write();
    let err = Dump::load(&dump_file.path, None).unwrap_err();
    assert!(matches!(err, DumpError::UnknownType { addr: 0x777 }));
}

#[test]
fn test_truncated_stream_is_fatal()
{
    let mut b = DumpBuilder::new();
    b.params_default();
    b.uvarint(1); // object tag, then nothing
    let dump_file = b.write();
    let err = Dump::load(&dump_file.path, None).unwrap_err();
    assert!(matches!(err, DumpError::Truncated { .. }));
}

#[test]
fn test_memstats_and_defers_retained()
{
    let mut b = DumpBuilder::new();
    b.params_default();
    // memstats: 24 counters, 256 pause samples, num-gc
    b.uvarint(10);
    for i in 0..24 {
        b.uvarint(i);
    }
    for _ in 0..256 {
        b.uvarint(7);
    }
    b.uvarint(3);
    // a defer and a panic record
    b.uvarint(14);
    for v in [0x9000u64, 1, 2, 3, 4, 5, 0] {
        b.uvarint(v);
    }
    b.uvarint(15);
    for v in [0x9100u64, 1, 2, 3, 4, 0] {
        b.uvarint(v);
    }
    b.eof();
    let dump_file = b.write();
    let d = Dump::load(&dump_file.path, None).expect("load");

    let stats = d.memstats.as_ref().expect("memstats");
    assert_eq!(stats.alloc, 0);
    assert_eq!(stats.heap_alloc, 6);
    assert_eq!(stats.pause_total_ns, 23);
    assert_eq!(stats.pause_ns[0], 7);
    assert_eq!(stats.num_gc, 3);
    assert_eq!(d.defers.len(), 1);
    assert_eq!(d.panics.len(), 1);
    assert_eq!(d.defers[0].addr, 0x9000);
    assert_eq!(d.panics[0].addr, 0x9100);
}
