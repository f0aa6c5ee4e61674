//! Marshalling bytecode: instruction words, type tags, and topic descriptors.
//!
//! Every topic type is described by a compact stream of 32-bit instruction
//! words produced by a type compiler and interpreted by the walkers in
//! [`crate::walker`].  An instruction is laid out MSB-first as
//!
//! ```text
//! [ op(8) | type(8) | subtype(8) | flags(8) ]
//! ```
//!
//! except for jump instructions, whose low half carries a signed 16-bit
//! delta.  The word *after* an `ADR` instruction is always the byte offset of
//! the addressed field inside the in-memory sample; further words depend on
//! the field kind (bound for bounded strings, element count for arrays,
//! packed jump fields for nested types).

use bitflags::bitflags;

// ─────────────────────────────────────────────────────────────────────────────
// Instruction opcodes and field masks
// ─────────────────────────────────────────────────────────────────────────────

/// Return-from-subroutine / end-of-stream terminator.
pub const OP_RTS: u32 = 0x00 << 24;
/// Address a field of the sample (followed by the field's byte offset).
pub const OP_ADR: u32 = 0x01 << 24;
/// Jump to subroutine: signed 16-bit delta in the low half of the word.
pub const OP_JSR: u32 = 0x02 << 24;
/// Union case entry: `[JEQ | case type, discriminant value, case offset]`.
pub const OP_JEQ: u32 = 0x03 << 24;

pub const OP_MASK: u32 = 0xff00_0000;
pub const OP_TYPE_MASK: u32 = 0x00ff_0000;
pub const OP_SUBTYPE_MASK: u32 = 0x0000_ff00;
pub const OP_JMP_MASK: u32 = 0x0000_ffff;
pub const OP_FLAGS_MASK: u32 = 0x0000_00ff;

/// The field participates in the topic key (valid on `ADR`).
pub const OP_FLAG_KEY: u32 = 0x01;
/// The last union case entry is the default case (valid on a union `ADR`).
pub const OP_FLAG_DEF: u32 = 0x02;

// ─────────────────────────────────────────────────────────────────────────────
// Type tags
// ─────────────────────────────────────────────────────────────────────────────

/// Field type tag, used both as the `type` and the `subtype` byte of an
/// `ADR` instruction and as the case type of a `JEQ`.
///
/// The first four variants are numbered so that `1 << (tag - 1)` is the size
/// (and CDR alignment) of the integer they denote.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u32)]
pub enum TypeCode {
    /// 1-byte integer (also octet, boolean, char).
    By1 = 1,
    /// 2-byte integer.
    By2 = 2,
    /// 4-byte integer (also float, enum).
    By4 = 3,
    /// 8-byte integer (also double).
    By8 = 4,
    /// Unbounded string: pointer to a NUL-terminated heap allocation.
    Str = 5,
    /// Bounded string: inline `bound`-byte buffer, NUL-terminated.
    Bst = 6,
    /// Dynamic sequence: inline [`crate::sample::Sequence`] header.
    Seq = 7,
    /// Fixed array, element count in the instruction stream.
    Arr = 8,
    /// Discriminated union.
    Uni = 9,
    /// Nested struct, reached through a `JSR`.
    Stu = 10,
}

impl TypeCode {
    /// Decodes a raw tag byte.  The instruction stream is produced by a
    /// trusted type compiler, so an unknown tag is a programming error.
    #[inline]
    pub fn from_u32(v: u32) -> TypeCode {
        match v {
            1 => TypeCode::By1,
            2 => TypeCode::By2,
            3 => TypeCode::By4,
            4 => TypeCode::By8,
            5 => TypeCode::Str,
            6 => TypeCode::Bst,
            7 => TypeCode::Seq,
            8 => TypeCode::Arr,
            9 => TypeCode::Uni,
            10 => TypeCode::Stu,
            _ => panic!("invalid type tag {v} in instruction stream"),
        }
    }

    /// Size in bytes of the integer types `By1`..`By8`.
    ///
    /// This is also their CDR alignment.  Must not be called for non-integer
    /// tags.
    #[inline(always)]
    pub fn prim_size(self) -> u32 {
        debug_assert!(self <= TypeCode::By8);
        1u32 << (self as u32 - 1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instruction field accessors
// ─────────────────────────────────────────────────────────────────────────────

/// Opcode of an instruction (one of `OP_RTS`/`OP_ADR`/`OP_JSR`/`OP_JEQ`).
#[inline(always)]
pub fn op(insn: u32) -> u32 {
    insn & OP_MASK
}

/// Type tag of an `ADR` instruction.
#[inline(always)]
pub fn op_type(insn: u32) -> TypeCode {
    TypeCode::from_u32((insn & OP_TYPE_MASK) >> 16)
}

/// Subtype tag of an `ADR` instruction (element type of sequences and
/// arrays, discriminant type of unions).
#[inline(always)]
pub fn op_subtype(insn: u32) -> TypeCode {
    TypeCode::from_u32((insn & OP_SUBTYPE_MASK) >> 8)
}

/// Flag byte of an `ADR` instruction.
#[inline(always)]
pub fn op_flags(insn: u32) -> u32 {
    insn & OP_FLAGS_MASK
}

/// Unsigned subroutine delta packed into the low half of a `jmp_jsr` word or
/// a `JEQ` instruction, relative to the instruction that owns it.
#[inline(always)]
pub fn adr_jsr(word: u32) -> u32 {
    word & OP_JMP_MASK
}

/// Jump-to-next-instruction delta packed into the high half of a `jmp_jsr`
/// word.  Zero means "use the fixed instruction width instead".
#[inline(always)]
pub fn adr_jmp(word: u32) -> u32 {
    word >> 16
}

/// Signed delta of a `JSR` instruction, relative to the `JSR` word itself.
#[inline(always)]
pub fn jump(insn: u32) -> i16 {
    (insn & OP_JMP_MASK) as u16 as i16
}

/// Case type tag of a `JEQ` instruction.
#[inline(always)]
pub fn jeq_type(insn: u32) -> TypeCode {
    TypeCode::from_u32((insn & OP_TYPE_MASK) >> 16)
}

// ─────────────────────────────────────────────────────────────────────────────
// Instruction composers (for descriptor authors and tests)
// ─────────────────────────────────────────────────────────────────────────────

/// Composes an `ADR` instruction for a scalar field.
#[inline]
pub const fn adr(t: TypeCode, flags: u32) -> u32 {
    OP_ADR | ((t as u32) << 16) | flags
}

/// Composes an `ADR` instruction with a subtype (sequences, arrays, unions).
#[inline]
pub const fn adr2(t: TypeCode, sub: TypeCode, flags: u32) -> u32 {
    OP_ADR | ((t as u32) << 16) | ((sub as u32) << 8) | flags
}

/// Composes a `JSR` instruction with a signed delta.
#[inline]
pub const fn jsr(delta: i16) -> u32 {
    OP_JSR | (delta as u16 as u32)
}

/// Composes a `JEQ` instruction; `jsr_delta` is only meaningful for case
/// types that are read through a subroutine.
#[inline]
pub const fn jeq(t: TypeCode, jsr_delta: u16) -> u32 {
    OP_JEQ | ((t as u32) << 16) | (jsr_delta as u32)
}

/// Packs the jump-to-next (high half) and jump-to-subroutine (low half)
/// deltas of a complex sequence/array/union descriptor word.
#[inline]
pub const fn jmp_jsr(jmp: u16, jsr_delta: u16) -> u32 {
    ((jmp as u32) << 16) | (jsr_delta as u32)
}

// ─────────────────────────────────────────────────────────────────────────────
// Topic descriptors
// ─────────────────────────────────────────────────────────────────────────────

bitflags! {
    /// Per-type flag set carried by a [`TypeDescriptor`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct DescriptorFlags: u32 {
        /// Never use the memcpy fast path even if the layout would allow it.
        const NO_OPTIMIZE = 0x01;
        /// The big-endian key CDR always fits in 16 bytes.
        const FIXED_KEY = 0x02;
        /// The type contains a union somewhere; sample reuse on read must
        /// free and zero the sample first.
        const CONTAINS_UNION = 0x04;
    }
}

/// One key field: its IDL-level name and the index of its `ADR` instruction
/// in the ops stream.
#[derive(Clone, Debug)]
pub struct KeyDescriptor {
    pub name: &'static str,
    pub index: u32,
}

/// Immutable description of a topic type: in-memory layout numbers, the
/// instruction stream, and the key field list in serialization order.
///
/// Invariants (guaranteed by the type compiler, not validated here): the
/// stream is terminated by `RTS`, and every key index references an `ADR`
/// with `OP_FLAG_KEY` whose type is a simple key type (integer, string, or
/// integer array).
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    /// Total byte size of the in-memory sample struct.
    pub size: u32,
    /// Natural alignment of the sample struct.
    pub align: u32,
    pub flags: DescriptorFlags,
    pub ops: Vec<u32>,
    pub keys: Vec<KeyDescriptor>,
}

impl TypeDescriptor {
    /// Number of key fields.
    #[inline]
    pub fn nkeys(&self) -> u32 {
        self.keys.len() as u32
    }
}

/// True when `insn` is an `ADR` that may legally serve as a key field.
pub(crate) fn key_insn_ok(insn: u32) -> bool {
    op(insn) == OP_ADR
        && (insn & OP_FLAG_KEY) != 0
        && (op_type(insn) <= TypeCode::Bst
            || (op_type(insn) == TypeCode::Arr && op_subtype(insn) <= TypeCode::By8))
}
