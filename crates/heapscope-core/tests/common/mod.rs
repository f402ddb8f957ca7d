//! Shared test helper: builds well-formed dump byte streams and parks them
//! in temp files for `Dump::load`.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Standard layout used by most tests: 64-bit little-endian, 96-byte channel
/// headers, a small heap window.
pub const HEAP_START: u64 = 0x10000;
pub const HEAP_END: u64 = 0x11000;
pub const HCHAN_SIZE: u64 = 96;

pub struct DumpBuilder
{
    buf: Vec<u8>,
}

impl DumpBuilder
{
    pub fn new() -> DumpBuilder
    {
        DumpBuilder {
            buf: b"go1.3 heap dump\n".to_vec(),
        }
    }

    /// Start without the header line, for header-validation tests.
    pub fn with_raw_header(header: &[u8]) -> DumpBuilder
    {
        DumpBuilder { buf: header.to_vec() }
    }

    pub fn uvarint(&mut self, mut v: u64) -> &mut Self
    {
        loop {
            let mut b = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                b |= 0x80;
            }
            self.buf.push(b);
            if v == 0 {
                return self;
            }
        }
    }

    pub fn string(&mut self, s: &str) -> &mut Self
    {
        self.uvarint(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn boolean(&mut self, v: bool) -> &mut Self
    {
        self.buf.push(v as u8);
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self
    {
        self.uvarint(b.len() as u64);
        self.buf.extend_from_slice(b);
        self
    }

    /// `(kind, offset)` pairs terminated by the end-of-fields sentinel.
    pub fn fields(&mut self, fields: &[(u64, u64)]) -> &mut Self
    {
        for &(kind, offset) in fields {
            self.uvarint(kind);
            self.uvarint(offset);
        }
        self.uvarint(0)
    }

    pub fn params_default(&mut self) -> &mut Self
    {
        self.params(0, 8, HCHAN_SIZE, HEAP_START, HEAP_END)
    }

    pub fn params(&mut self, endian: u64, ptr_size: u64, hchan: u64, heap_start: u64, heap_end: u64) -> &mut Self
    {
        self.uvarint(6);
        self.uvarint(endian);
        self.uvarint(ptr_size);
        self.uvarint(hchan);
        self.uvarint(heap_start);
        self.uvarint(heap_end);
        self.uvarint(u64::from(b'8'));
        self.string("");
        self.uvarint(1)
    }

    pub fn type_record(&mut self, addr: u64, size: u64, name: &str, eface_ptr: bool, fields: &[(u64, u64)]) -> &mut Self
    {
        self.uvarint(3);
        self.uvarint(addr);
        self.uvarint(size);
        self.string(name);
        self.boolean(eface_ptr);
        self.fields(fields)
    }

    pub fn object(&mut self, addr: u64, type_addr: u64, kind: u64, body: &[u8]) -> &mut Self
    {
        self.uvarint(1);
        self.uvarint(addr);
        self.uvarint(type_addr);
        self.uvarint(kind);
        self.uvarint(body.len() as u64);
        self.buf.extend_from_slice(body);
        self
    }

    pub fn itab(&mut self, addr: u64, data_is_ptr: bool) -> &mut Self
    {
        self.uvarint(8);
        self.uvarint(addr);
        self.boolean(data_is_ptr)
    }

    pub fn other_root(&mut self, description: &str, to_addr: u64) -> &mut Self
    {
        self.uvarint(2);
        self.string(description);
        self.uvarint(to_addr)
    }

    pub fn data_segment(&mut self, addr: u64, data: &[u8], fields: &[(u64, u64)]) -> &mut Self
    {
        self.uvarint(12);
        self.uvarint(addr);
        self.bytes(data);
        self.fields(fields)
    }

    pub fn bss_segment(&mut self, addr: u64, data: &[u8], fields: &[(u64, u64)]) -> &mut Self
    {
        self.uvarint(13);
        self.uvarint(addr);
        self.bytes(data);
        self.fields(fields)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn frame(&mut self, sp: u64, depth: u64, child_sp: u64, data: &[u8], name: &str, fields: &[(u64, u64)]) -> &mut Self
    {
        self.uvarint(5);
        self.uvarint(sp);
        self.uvarint(depth);
        self.uvarint(child_sp);
        self.bytes(data);
        self.uvarint(0x400000); // entry
        self.uvarint(0x400010); // pc
        self.string(name);
        self.fields(fields)
    }

    pub fn goroutine(&mut self, addr: u64, bos_sp: u64, goid: u64, status: u64, ctxt_addr: u64) -> &mut Self
    {
        self.uvarint(4);
        self.uvarint(addr);
        self.uvarint(bos_sp);
        self.uvarint(goid);
        self.uvarint(0x400000); // gopc
        self.uvarint(status);
        self.boolean(false); // system
        self.boolean(false); // background
        self.uvarint(0); // wait since
        self.string("chan receive"); // wait reason
        self.uvarint(ctxt_addr);
        self.uvarint(0); // m
        self.uvarint(0); // defer
        self.uvarint(0) // panic
    }

    pub fn qfinalizer(&mut self, obj: u64, fn_addr: u64, code: u64, fint: u64, ot: u64) -> &mut Self
    {
        self.uvarint(11);
        self.uvarint(obj);
        self.uvarint(fn_addr);
        self.uvarint(code);
        self.uvarint(fint);
        self.uvarint(ot)
    }

    pub fn finalizer(&mut self, obj: u64, fn_addr: u64, code: u64, fint: u64, ot: u64) -> &mut Self
    {
        self.uvarint(7);
        self.uvarint(obj);
        self.uvarint(fn_addr);
        self.uvarint(code);
        self.uvarint(fint);
        self.uvarint(ot)
    }

    pub fn eof(&mut self) -> &mut Self
    {
        self.uvarint(0)
    }

    /// Write the stream to a fresh temp file. The file is deleted when the
    /// returned guard drops.
    pub fn write(&self) -> TempDump
    {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("heapscope-test-{}-{n}.dump", std::process::id()));
        fs::write(&path, &self.buf).expect("write test dump");
        TempDump { path }
    }
}

pub struct TempDump
{
    pub path: PathBuf,
}

impl Drop for TempDump
{
    fn drop(&mut self)
    {
        let _ = fs::remove_file(&self.path);
    }
}

/// Little-endian 8-byte pointer.
pub fn ptr64(v: u64) -> [u8; 8]
{
    v.to_le_bytes()
}

/// Concatenate byte slices into one object body.
pub fn body(parts: &[&[u8]]) -> Vec<u8>
{
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}
