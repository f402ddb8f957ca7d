//! # Error Types
//!
//! Error handling for dump loading and graph queries.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Errors come in exactly one flavor here: a load either completes and yields
//! a fully linked [`crate::Dump`], or it fails with one of these variants and
//! yields nothing. Recoverable disagreements between the dump and the DWARF
//! info are not errors; they are logged as warnings and the loader falls back
//! to the information carried by the dump itself.

use thiserror::Error;

/// Main error type for dump operations
///
/// Each variant corresponds to a precondition the input failed to meet. Where
/// it helps pinpoint the problem, the variant carries the absolute file offset
/// of the record being decoded when the failure was detected.
#[derive(Error, Debug)]
pub enum DumpError
{
    /// The dump file does not start with the expected header line
    ///
    /// Every supported dump begins with the ASCII line `go1.3 heap dump`.
    /// Anything else (including dumps from other runtime versions) is
    /// rejected up front rather than misparsed.
    #[error("not a go1.3 heap dump file")]
    BadHeader,

    /// A record tag outside the known set was encountered
    #[error("unknown record tag {tag} at offset 0x{offset:x}")]
    UnknownTag
    {
        /// The unrecognized tag value
        tag: u64,
        /// File offset at which the tag was read
        offset: u64,
    },

    /// The byte stream ended in the middle of a record
    #[error("truncated record at offset 0x{offset:x}: {what}")]
    Truncated
    {
        /// What was being decoded when the stream ran dry
        what: &'static str,
        /// File offset of the partial value
        offset: u64,
    },

    /// The dump declares a pointer-size/byte-order combination we can't read
    ///
    /// Only little/big endian crossed with 4- or 8-byte pointers is
    /// supported; these are the only combinations the runtime emits.
    #[error("unsupported parameters: endian={endian} ptr_size={ptr_size}")]
    UnsupportedParams
    {
        /// Raw endianness discriminator from the params record
        endian: u64,
        /// Declared pointer width in bytes
        ptr_size: u64,
    },

    /// An object record appeared before the params record
    ///
    /// Object layouts depend on the pointer size and byte order declared by
    /// the params record, so the dumper always writes params first.
    #[error("object record at offset 0x{offset:x} precedes params record")]
    MissingParams
    {
        /// File offset of the offending object record
        offset: u64,
    },

    /// A channel object appeared before the channel header size was known
    #[error("channel object at offset 0x{offset:x} precedes hchan size")]
    MissingChanSize
    {
        /// File offset of the offending object record
        offset: u64,
    },

    /// An object referenced a type address with no preceding type record
    #[error("no type record for type address 0x{addr:x} (types must precede use)")]
    UnknownType
    {
        /// The unresolvable type address
        addr: u64,
    },

    /// An object record carried an invalid kind discriminator
    #[error("bad object kind {kind} at offset 0x{offset:x}")]
    BadObjectKind
    {
        /// The unrecognized kind value
        kind: u64,
        /// File offset of the object record
        offset: u64,
    },

    /// A field list carried a kind value outside the known set
    #[error("bad field kind {kind} at offset 0x{offset:x}")]
    BadFieldKind
    {
        /// The unrecognized kind value
        kind: u64,
        /// File offset at which the kind was read
        offset: u64,
    },

    /// A type/kind combination that has no defined layout
    ///
    /// Arrays and channels require a type record; conservatively-scanned
    /// objects must not have one.
    #[error("object kind {kind} is invalid for type {type_desc}")]
    BadTypeKindCombo
    {
        /// Kind discriminator as decoded
        kind: u64,
        /// Short description of the type slot ("none" or the type name)
        type_desc: String,
    },

    /// A typeless allocation has a size we can't tile with raw-data fields
    #[error("typeless object size {size} is not a multiple of 8")]
    OddRawSize
    {
        /// Declared object size
        size: u64,
    },

    /// A goroutine's top-of-stack frame is missing from the frame index
    #[error("no stack frame at sp=0x{sp:x} depth=0 for goroutine 0x{addr:x}")]
    MissingTopFrame
    {
        /// Goroutine address from the dump
        addr: u64,
        /// The goroutine's recorded top-of-stack pointer
        sp: u64,
    },

    /// A goroutine carries a status code the runtime never writes to a dump
    ///
    /// Status 2 (running) also lands here: a dump is taken with the world
    /// stopped, so a running goroutine means the dump is corrupt.
    #[error("goroutine 0x{addr:x} has unexpected status {status}")]
    BadGoroutineStatus
    {
        /// Goroutine address from the dump
        addr: u64,
        /// The offending status code
        status: u64,
    },

    /// The executable could not be parsed as ELF, Mach-O, or PE
    #[error("can't read executable {path}: {reason}")]
    BadExecutable
    {
        /// Path we attempted to open
        path: String,
        /// Underlying parse failure
        reason: String,
    },

    /// The DWARF info in the executable is corrupt or self-inconsistent
    ///
    /// Covers missing typedef referents, value-type cycles, and member
    /// records outside any struct.
    #[error("corrupt DWARF info: {0}")]
    CorruptDwarf(String),

    /// Low-level DWARF section decoding failure
    #[error("DWARF decoding error: {0}")]
    Dwarf(#[from] gimli::Error),

    /// I/O error reading the dump file or the executable
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, DumpError>`
pub type Result<T> = std::result::Result<T, DumpError>;
