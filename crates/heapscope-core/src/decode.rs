//! # Tagged-Record Decoder
//!
//! Pulls varint-encoded records out of a dump file and materializes the raw
//! entity collections of a [`Dump`].
//!
//! The stream starts with the literal header line `go1.3 heap dump` followed
//! by records, each introduced by a uvarint tag, until an EOF tag. Object
//! bodies are the one thing not copied into memory: the decoder notes their
//! file offset and skips them, so a multi-gigabyte heap costs file seeks
//! instead of resident bytes.
//!
//! Integers are unsigned LEB128 (seven payload bits per byte, high bit set on
//! continuation). Strings are a uvarint length followed by that many bytes.
//! Booleans are one byte, zero or not. Field lists are `(kind, offset)`
//! uvarint pairs terminated by kind zero.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::dump::{Dump, Object};
use crate::error::{DumpError, Result};
use crate::fulltype::{self, FtKey};
use crate::record::{self, ByteOrder, Data, Defer, Field, FieldKind, Finalizer, GoRoutine, MemStats, OSThread, OtherRoot, Panic,
                    QFinalizer, StackFrame, Type, TypeKind};

const HEADER: &[u8] = b"go1.3 heap dump\n";

/// Buffered reader that tracks its absolute file offset, so record errors can
/// point at the byte that caused them and object bodies can be located later.
struct RecordReader
{
    inner: BufReader<File>,
    offset: u64,
}

impl RecordReader
{
    fn new(file: File) -> RecordReader
    {
        RecordReader {
            inner: BufReader::new(file),
            offset: 0,
        }
    }

    fn read_byte(&mut self, what: &'static str) -> Result<u8>
    {
        let mut b = [0u8; 1];
        match self.inner.read_exact(&mut b) {
            Ok(()) => {
                self.offset += 1;
                Ok(b[0])
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(DumpError::Truncated {
                what,
                offset: self.offset,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Unsigned LEB128. At most ten bytes; anything longer is corrupt.
    fn read_uvarint(&mut self, what: &'static str) -> Result<u64>
    {
        let start = self.offset;
        let mut v = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte(what)?;
            if shift >= 64 {
                return Err(DumpError::Truncated { what, offset: start });
            }
            v |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
        }
    }

    fn read_n_bytes(&mut self, n: u64, what: &'static str) -> Result<Vec<u8>>
    {
        let mut buf = vec![0u8; n as usize];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => {
                self.offset += n;
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(DumpError::Truncated {
                what,
                offset: self.offset,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn read_bytes(&mut self, what: &'static str) -> Result<Vec<u8>>
    {
        let n = self.read_uvarint(what)?;
        self.read_n_bytes(n, what)
    }

    fn read_string(&mut self, what: &'static str) -> Result<String>
    {
        let bytes = self.read_bytes(what)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_bool(&mut self, what: &'static str) -> Result<bool>
    {
        Ok(self.read_byte(what)? != 0)
    }

    /// Field lists come kind-first, zero-terminated. Offsets are kept in
    /// ascending order; names are filled in by a later naming pass.
    fn read_fields(&mut self, what: &'static str) -> Result<Vec<Field>>
    {
        let mut fields = Vec::new();
        loop {
            let at = self.offset;
            let kind = self.read_uvarint(what)?;
            if kind == 0 {
                fields.sort_by_key(|f: &Field| f.offset);
                return Ok(fields);
            }
            let kind = FieldKind::from_wire(kind).ok_or(DumpError::BadFieldKind { kind, offset: at })?;
            let offset = self.read_uvarint(what)?;
            fields.push(Field::new(kind, offset));
        }
    }

    /// Skip over bytes without buffering them (object bodies).
    fn skip(&mut self, n: u64, what: &'static str) -> Result<()>
    {
        let delta = i64::try_from(n).map_err(|_| DumpError::Truncated {
            what,
            offset: self.offset,
        })?;
        self.inner.seek_relative(delta)?;
        self.offset += n;
        Ok(())
    }

    fn expect_header(&mut self) -> Result<()>
    {
        let mut line = Vec::new();
        self.inner.read_until(b'\n', &mut line)?;
        self.offset += line.len() as u64;
        if line != HEADER {
            return Err(DumpError::BadHeader);
        }
        Ok(())
    }
}

/// Read the raw record stream into an unlinked [`Dump`].
///
/// Everything except object bodies is copied into memory; bodies are located
/// by file offset for on-demand reads. Duplicate type records (same address)
/// are discarded. Naming, layout expansion, and linking happen later.
pub(crate) fn parse_dump(path: &Path) -> Result<Dump>
{
    let body_file = File::open(path)?;
    let mut r = RecordReader::new(File::open(path)?);
    r.expect_header()?;

    let mut d = Dump::new_unindexed(ByteOrder::Little, body_file);
    let mut params_seen = false;
    // full-type dedup, keyed by (type address, kind, sizeclass size)
    let mut ftmap: HashMap<FtKey, usize> = HashMap::new();

    loop {
        let record_offset = r.offset;
        let tag = r.read_uvarint("record tag")?;
        match tag {
            record::TAG_EOF => break,
            record::TAG_OBJECT => {
                if !params_seen {
                    return Err(DumpError::MissingParams { offset: record_offset });
                }
                let addr = r.read_uvarint("object record")?;
                let type_addr = r.read_uvarint("object record")?;
                let kind = r.read_uvarint("object record")?;
                let kind = TypeKind::from_wire(kind).ok_or(DumpError::BadObjectKind {
                    kind,
                    offset: record_offset,
                })?;
                let size = r.read_uvarint("object record")?;
                if kind == TypeKind::Chan && d.hchan_size == 0 {
                    return Err(DumpError::MissingChanSize { offset: record_offset });
                }
                let key: FtKey = (type_addr, kind, size);
                let ft = match ftmap.get(&key) {
                    Some(&ft) => ft,
                    None => {
                        let ft = fulltype::intern(&mut d, type_addr, kind, size)?;
                        ftmap.insert(key, ft);
                        ft
                    }
                };
                let body_offset = r.offset;
                r.skip(size, "object body")?;
                d.objects.push(Object { addr, ft, body_offset });
            }
            record::TAG_OTHER_ROOT => {
                let description = r.read_string("other-root record")?;
                let to_addr = r.read_uvarint("other-root record")?;
                d.other_roots.push(OtherRoot {
                    description,
                    to_addr,
                    edge: None,
                });
            }
            record::TAG_TYPE => {
                let addr = r.read_uvarint("type record")?;
                let size = r.read_uvarint("type record")?;
                let name = r.read_string("type record")?;
                let eface_ptr = r.read_bool("type record")?;
                let fields = r.read_fields("type record")?;
                // Dumps may carry duplicate type records; keep the first.
                if !d.type_map.contains_key(&addr) {
                    d.type_map.insert(addr, d.types.len());
                    d.types.push(Type {
                        addr,
                        size,
                        name,
                        eface_ptr,
                        fields,
                    });
                }
            }
            record::TAG_GOROUTINE => {
                let g = GoRoutine {
                    addr: r.read_uvarint("goroutine record")?,
                    bos_addr: r.read_uvarint("goroutine record")?,
                    goid: r.read_uvarint("goroutine record")?,
                    gopc: r.read_uvarint("goroutine record")?,
                    status: r.read_uvarint("goroutine record")?,
                    is_system: r.read_bool("goroutine record")?,
                    is_background: r.read_bool("goroutine record")?,
                    wait_since: r.read_uvarint("goroutine record")?,
                    wait_reason: r.read_string("goroutine record")?,
                    ctxt_addr: r.read_uvarint("goroutine record")?,
                    m_addr: r.read_uvarint("goroutine record")?,
                    defer_addr: r.read_uvarint("goroutine record")?,
                    panic_addr: r.read_uvarint("goroutine record")?,
                    bos: None,
                    ctxt: crate::dump::ObjId::NIL,
                };
                if g.status == 2 || g.status > 5 {
                    return Err(DumpError::BadGoroutineStatus {
                        addr: g.addr,
                        status: g.status,
                    });
                }
                d.goroutines.push(g);
            }
            record::TAG_STACK_FRAME => {
                let frame = StackFrame {
                    addr: r.read_uvarint("stack frame record")?,
                    depth: r.read_uvarint("stack frame record")?,
                    child_addr: r.read_uvarint("stack frame record")?,
                    data: r.read_bytes("stack frame record")?,
                    entry: r.read_uvarint("stack frame record")?,
                    pc: r.read_uvarint("stack frame record")?,
                    name: r.read_string("stack frame record")?,
                    fields: r.read_fields("stack frame record")?,
                    edges: Vec::new(),
                    parent: None,
                    goroutine: None,
                };
                d.frames.push(frame);
            }
            record::TAG_PARAMS => {
                let endian = r.read_uvarint("params record")?;
                let ptr_size = r.read_uvarint("params record")?;
                if endian > 1 || !(ptr_size == 4 || ptr_size == 8) {
                    return Err(DumpError::UnsupportedParams { endian, ptr_size });
                }
                d.order = if endian == 0 { ByteOrder::Little } else { ByteOrder::Big };
                d.ptr_size = ptr_size;
                d.hchan_size = r.read_uvarint("params record")?;
                d.heap_start = r.read_uvarint("params record")?;
                d.heap_end = r.read_uvarint("params record")?;
                d.arch_char = r.read_uvarint("params record")? as u8;
                d.experiment = r.read_string("params record")?;
                d.ncpu = r.read_uvarint("params record")?;
                params_seen = true;
            }
            record::TAG_FINALIZER => {
                d.finalizers.push(Finalizer {
                    obj: r.read_uvarint("finalizer record")?,
                    fn_addr: r.read_uvarint("finalizer record")?,
                    code: r.read_uvarint("finalizer record")?,
                    fint: r.read_uvarint("finalizer record")?,
                    ot: r.read_uvarint("finalizer record")?,
                });
            }
            record::TAG_QUEUED_FINALIZER => {
                d.qfinalizers.push(QFinalizer {
                    obj: r.read_uvarint("queued finalizer record")?,
                    fn_addr: r.read_uvarint("queued finalizer record")?,
                    code: r.read_uvarint("queued finalizer record")?,
                    fint: r.read_uvarint("queued finalizer record")?,
                    ot: r.read_uvarint("queued finalizer record")?,
                    edges: Vec::new(),
                });
            }
            record::TAG_DATA | record::TAG_BSS => {
                let seg = Data {
                    addr: r.read_uvarint("data segment record")?,
                    data: r.read_bytes("data segment record")?,
                    fields: r.read_fields("data segment record")?,
                    edges: Vec::new(),
                };
                if tag == record::TAG_DATA {
                    d.data = Some(seg);
                } else {
                    d.bss = Some(seg);
                }
            }
            record::TAG_ITAB => {
                let addr = r.read_uvarint("itab record")?;
                let ptr = r.read_bool("itab record")?;
                d.itab_map.insert(addr, ptr);
            }
            record::TAG_OS_THREAD => {
                d.os_threads.push(OSThread {
                    addr: r.read_uvarint("os thread record")?,
                    id: r.read_uvarint("os thread record")?,
                    procid: r.read_uvarint("os thread record")?,
                });
            }
            record::TAG_MEM_STATS => {
                d.memstats = Some(read_memstats(&mut r)?);
            }
            record::TAG_DEFER => {
                d.defers.push(Defer {
                    addr: r.read_uvarint("defer record")?,
                    gp: r.read_uvarint("defer record")?,
                    argp: r.read_uvarint("defer record")?,
                    pc: r.read_uvarint("defer record")?,
                    fn_addr: r.read_uvarint("defer record")?,
                    code: r.read_uvarint("defer record")?,
                    link: r.read_uvarint("defer record")?,
                });
            }
            record::TAG_PANIC => {
                d.panics.push(Panic {
                    addr: r.read_uvarint("panic record")?,
                    gp: r.read_uvarint("panic record")?,
                    typ: r.read_uvarint("panic record")?,
                    data: r.read_uvarint("panic record")?,
                    defr: r.read_uvarint("panic record")?,
                    link: r.read_uvarint("panic record")?,
                });
            }
            tag => {
                return Err(DumpError::UnknownTag {
                    tag,
                    offset: record_offset,
                })
            }
        }
    }

    debug!(
        objects = d.objects.len(),
        types = d.types.len(),
        frames = d.frames.len(),
        goroutines = d.goroutines.len(),
        "decoded dump records"
    );
    Ok(d)
}

fn read_memstats(r: &mut RecordReader) -> Result<MemStats>
{
    const WHAT: &str = "memstats record";
    let mut stats = MemStats {
        alloc: r.read_uvarint(WHAT)?,
        total_alloc: r.read_uvarint(WHAT)?,
        sys: r.read_uvarint(WHAT)?,
        lookups: r.read_uvarint(WHAT)?,
        mallocs: r.read_uvarint(WHAT)?,
        frees: r.read_uvarint(WHAT)?,
        heap_alloc: r.read_uvarint(WHAT)?,
        heap_sys: r.read_uvarint(WHAT)?,
        heap_idle: r.read_uvarint(WHAT)?,
        heap_inuse: r.read_uvarint(WHAT)?,
        heap_released: r.read_uvarint(WHAT)?,
        heap_objects: r.read_uvarint(WHAT)?,
        stack_inuse: r.read_uvarint(WHAT)?,
        stack_sys: r.read_uvarint(WHAT)?,
        mspan_inuse: r.read_uvarint(WHAT)?,
        mspan_sys: r.read_uvarint(WHAT)?,
        mcache_inuse: r.read_uvarint(WHAT)?,
        mcache_sys: r.read_uvarint(WHAT)?,
        buck_hash_sys: r.read_uvarint(WHAT)?,
        gc_sys: r.read_uvarint(WHAT)?,
        other_sys: r.read_uvarint(WHAT)?,
        next_gc: r.read_uvarint(WHAT)?,
        last_gc: r.read_uvarint(WHAT)?,
        pause_total_ns: r.read_uvarint(WHAT)?,
        pause_ns: Box::new([0u64; 256]),
        num_gc: 0,
    };
    for slot in stats.pause_ns.iter_mut() {
        *slot = r.read_uvarint(WHAT)?;
    }
    stats.num_gc = r.read_uvarint(WHAT)? as u32;
    Ok(stats)
}
