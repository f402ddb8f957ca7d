//! # Dump Record Model
//!
//! Raw record types as they appear in the dump byte stream, plus the field
//! and object kind discriminators shared by the decoder, the DWARF resolver,
//! and the linker.
//!
//! Records are decoded once by [`crate::decode`] and never mutated afterwards
//! except for the naming and linking passes, which fill in field names,
//! parent/owner references, and realized edges.

use crate::dump::{Edge, ObjId};

/// Record tags, in dump wire order.
pub const TAG_EOF: u64 = 0;
pub const TAG_OBJECT: u64 = 1;
pub const TAG_OTHER_ROOT: u64 = 2;
pub const TAG_TYPE: u64 = 3;
pub const TAG_GOROUTINE: u64 = 4;
pub const TAG_STACK_FRAME: u64 = 5;
pub const TAG_PARAMS: u64 = 6;
pub const TAG_FINALIZER: u64 = 7;
pub const TAG_ITAB: u64 = 8;
pub const TAG_OS_THREAD: u64 = 9;
pub const TAG_MEM_STATS: u64 = 10;
pub const TAG_QUEUED_FINALIZER: u64 = 11;
pub const TAG_DATA: u64 = 12;
pub const TAG_BSS: u64 = 13;
pub const TAG_DEFER: u64 = 14;
pub const TAG_PANIC: u64 = 15;

/// What kind of value lives at a particular offset within an object.
///
/// The first six kinds can carry pointers and drive edge emission; the
/// numeric kinds exist so the full layout of an object can be rendered.
/// `Bytes8`/`Bytes16` are synthetic raw-data kinds used for allocations
/// without type information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind
{
    Ptr,
    String,
    Slice,
    Iface,
    Eface,
    Bool,
    UInt8,
    SInt8,
    UInt16,
    SInt16,
    UInt32,
    SInt32,
    UInt64,
    SInt64,
    Float32,
    Float64,
    Complex64,
    Complex128,
    Bytes8,
    Bytes16,
}

impl FieldKind
{
    /// Decode a wire value. Zero is the end-of-fields sentinel and is handled
    /// by the field-list reader, so it is not a valid kind here.
    pub fn from_wire(v: u64) -> Option<FieldKind>
    {
        Some(match v {
            1 => FieldKind::Ptr,
            2 => FieldKind::String,
            3 => FieldKind::Slice,
            4 => FieldKind::Iface,
            5 => FieldKind::Eface,
            6 => FieldKind::Bool,
            7 => FieldKind::UInt8,
            8 => FieldKind::SInt8,
            9 => FieldKind::UInt16,
            10 => FieldKind::SInt16,
            11 => FieldKind::UInt32,
            12 => FieldKind::SInt32,
            13 => FieldKind::UInt64,
            14 => FieldKind::SInt64,
            15 => FieldKind::Float32,
            16 => FieldKind::Float64,
            17 => FieldKind::Complex64,
            18 => FieldKind::Complex128,
            19 => FieldKind::Bytes8,
            20 => FieldKind::Bytes16,
            _ => return None,
        })
    }

    /// Whether a field of this kind can produce an outgoing edge.
    pub fn is_pointerish(self) -> bool
    {
        matches!(
            self,
            FieldKind::Ptr | FieldKind::String | FieldKind::Slice | FieldKind::Iface | FieldKind::Eface
        )
    }
}

/// How an object's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind
{
    /// Single value of the recorded type.
    Object,
    /// Contiguous repetition of the recorded type.
    Array,
    /// Channel storage: fixed header followed by element slots.
    Chan,
    /// No type information; every aligned word might be a pointer.
    Conservative,
}

impl TypeKind
{
    pub fn from_wire(v: u64) -> Option<TypeKind>
    {
        Some(match v {
            0 => TypeKind::Object,
            1 => TypeKind::Array,
            2 => TypeKind::Chan,
            127 => TypeKind::Conservative,
            _ => return None,
        })
    }

    pub fn wire_value(self) -> u64
    {
        match self {
            TypeKind::Object => 0,
            TypeKind::Array => 1,
            TypeKind::Chan => 2,
            TypeKind::Conservative => 127,
        }
    }
}

/// A location in a container where a value of interest lives.
///
/// The dump only records pointer-bearing fields; DWARF info, when available
/// and consistent, replaces those lists with complete ones including numeric
/// fields and names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field
{
    pub kind: FieldKind,
    /// Byte offset from the start of the containing object/frame/segment.
    pub offset: u64,
    /// Dotted path name; empty until a naming pass runs.
    pub name: String,
}

impl Field
{
    pub fn new(kind: FieldKind, offset: u64) -> Field
    {
        Field {
            kind,
            offset,
            name: String::new(),
        }
    }

    pub fn named(kind: FieldKind, offset: u64, name: impl Into<String>) -> Field
    {
        Field {
            kind,
            offset,
            name: name.into(),
        }
    }
}

/// Join two dotted-name components, tolerating empty sides.
pub fn join_names(a: &str, b: &str) -> String
{
    if a.is_empty() {
        return b.to_string();
    }
    if b.is_empty() {
        return a.to_string();
    }
    format!("{a}.{b}")
}

/// Declared byte order of the dumped process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder
{
    Little,
    Big,
}

/// A type as recorded in the dump.
///
/// Not necessarily unique by name; unique by address (duplicate records for
/// the same address are discarded during decoding).
#[derive(Debug, Clone)]
pub struct Type
{
    pub addr: u64,
    pub size: u64,
    pub name: String,
    /// Whether an eface whose type word points at this type stores a pointer
    /// in its data word.
    pub eface_ptr: bool,
    /// Ordered by increasing offset.
    pub fields: Vec<Field>,
}

/// A stack frame captured by the dump.
///
/// `parent` and `goroutine` are filled by the linker; they index into the
/// owning [`crate::Dump`]'s frame and goroutine arrays.
#[derive(Debug, Clone)]
pub struct StackFrame
{
    /// Stack pointer (lowest address) of the frame.
    pub addr: u64,
    /// Distance from the top of the stack; the running frame has depth 0.
    pub depth: u64,
    /// Stack pointer of the child (callee) frame.
    pub child_addr: u64,
    /// Live bytes of the frame.
    pub data: Vec<u8>,
    pub entry: u64,
    pub pc: u64,
    pub name: String,
    pub fields: Vec<Field>,
    /// Edges found in this frame's bytes; realized by the linker.
    pub edges: Vec<Edge>,
    pub parent: Option<usize>,
    pub goroutine: Option<usize>,
}

/// A goroutine record.
///
/// `bos` (bottom-of-stack, i.e. the currently running frame) and `ctxt` are
/// resolved by the linker.
#[derive(Debug, Clone)]
pub struct GoRoutine
{
    pub addr: u64,
    pub bos_addr: u64,
    pub goid: u64,
    pub gopc: u64,
    pub status: u64,
    pub is_system: bool,
    pub is_background: bool,
    pub wait_since: u64,
    pub wait_reason: String,
    pub ctxt_addr: u64,
    pub m_addr: u64,
    pub defer_addr: u64,
    pub panic_addr: u64,
    /// Index of the frame at the top of this goroutine's stack.
    pub bos: Option<usize>,
    /// The scheduling context object, if it lives in the heap.
    pub ctxt: ObjId,
}

impl GoRoutine
{
    /// Human-readable scheduling state.
    ///
    /// Dumps are taken with the world stopped, so status 2 (running) never
    /// appears in a well-formed dump; the loader rejects it.
    pub fn status_name(&self) -> &str
    {
        match self.status {
            0 => "idle",
            1 => "runnable",
            3 => "syscall",
            4 => &self.wait_reason,
            5 => "dead",
            _ => "unknown",
        }
    }
}

/// An initialized-data or zero-initialized (bss) segment root.
#[derive(Debug, Clone)]
pub struct Data
{
    pub addr: u64,
    pub data: Vec<u8>,
    pub fields: Vec<Field>,
    pub edges: Vec<Edge>,
}

/// A miscellaneous GC root with a one-line description.
#[derive(Debug, Clone)]
pub struct OtherRoot
{
    pub description: String,
    pub to_addr: u64,
    /// Filled by the linker when `to_addr` resolves to a heap object.
    pub edge: Option<Edge>,
}

/// A registered-but-not-yet-triggered finalizer. The object is still live.
#[derive(Debug, Clone, Copy)]
pub struct Finalizer
{
    pub obj: u64,
    pub fn_addr: u64,
    pub code: u64,
    pub fint: u64,
    pub ot: u64,
}

/// A finalizer that is ready to run; it owns its edges.
#[derive(Debug, Clone)]
pub struct QFinalizer
{
    pub obj: u64,
    pub fn_addr: u64,
    pub code: u64,
    pub fint: u64,
    pub ot: u64,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Copy)]
pub struct Defer
{
    pub addr: u64,
    pub gp: u64,
    pub argp: u64,
    pub pc: u64,
    pub fn_addr: u64,
    pub code: u64,
    pub link: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Panic
{
    pub addr: u64,
    pub gp: u64,
    pub typ: u64,
    pub data: u64,
    pub defr: u64,
    pub link: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct OSThread
{
    pub addr: u64,
    pub id: u64,
    pub procid: u64,
}

/// Runtime memory statistics snapshot carried by the dump.
///
/// Field order matches the wire order of the memstats record.
#[derive(Debug, Clone)]
pub struct MemStats
{
    pub alloc: u64,
    pub total_alloc: u64,
    pub sys: u64,
    pub lookups: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub heap_alloc: u64,
    pub heap_sys: u64,
    pub heap_idle: u64,
    pub heap_inuse: u64,
    pub heap_released: u64,
    pub heap_objects: u64,
    pub stack_inuse: u64,
    pub stack_sys: u64,
    pub mspan_inuse: u64,
    pub mspan_sys: u64,
    pub mcache_inuse: u64,
    pub mcache_sys: u64,
    pub buck_hash_sys: u64,
    pub gc_sys: u64,
    pub other_sys: u64,
    pub next_gc: u64,
    pub last_gc: u64,
    pub pause_total_ns: u64,
    pub pause_ns: Box<[u64; 256]>,
    pub num_gc: u32,
}
