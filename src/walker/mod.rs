//! The bytecode walkers: one dispatch loop per mode over the shared
//! instruction set.
//!
//! Every mode — write, read, normalize, key extraction, pretty-printing,
//! contents freeing — interprets the same instruction stream with a cursor
//! `(ops, idx)` into the topic's ops array.  Jump deltas are relative to the
//! instruction word that carries them, so the cursor is an index into the
//! full array rather than a subslice.

pub mod extract;
pub mod free;
pub mod normalize;
pub mod print;
pub mod read;
pub mod write;

pub use normalize::{normalize, NormalizeError};

use crate::ops::{self, TypeCode, OP_FLAG_DEF};

/// Resolves a union's case table and finds the entry matching `disc`.
///
/// `uni_idx` indexes the union's `ADR` instruction.  Returns the index of
/// the matching `JEQ` triple; when no case matches and the union declares a
/// default, the last triple (the default case) is returned.
pub(crate) fn find_union_case(ops: &[u32], uni_idx: usize, disc: u32) -> Option<usize> {
    debug_assert_eq!(ops::op_type(ops[uni_idx]), TypeCode::Uni);
    let has_default = ops[uni_idx] & OP_FLAG_DEF != 0;
    let numcases = ops[uni_idx + 2] as usize;
    let jeq = uni_idx + ops::adr_jsr(ops[uni_idx + 3]) as usize;
    debug_assert!(numcases > 0);
    if cfg!(debug_assertions) {
        for ci in 0..numcases {
            debug_assert_eq!(ops::op(ops[jeq + 3 * ci]), ops::OP_JEQ);
        }
    }
    let searchable = numcases - usize::from(has_default);
    for ci in 0..searchable {
        if ops[jeq + 3 * ci + 1] == disc {
            return Some(jeq + 3 * ci);
        }
    }
    has_default.then(|| jeq + 3 * (numcases - 1))
}

/// Advances the cursor past a sequence descriptor without visiting its
/// element stream (the zero-length case).  A zero jump-to-next field falls
/// back to the fixed 4-word width.
pub(crate) fn skip_sequence_insns(ops: &[u32], idx: usize, insn: u32) -> usize {
    match ops::op_subtype(insn) {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 | TypeCode::Str => idx + 2,
        TypeCode::Bst => idx + 3,
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let jmp = ops::adr_jmp(ops[idx + 3]) as usize;
            idx + if jmp != 0 { jmp } else { 4 }
        }
    }
}

/// Cursor advance past a complex array descriptor (5 fixed words when the
/// jump-to-next field is zero).
#[inline]
pub(crate) fn next_after_complex_arr(ops: &[u32], idx: usize) -> usize {
    let jmp = ops::adr_jmp(ops[idx + 3]) as usize;
    idx + if jmp != 0 { jmp } else { 5 }
}

/// Cursor advance past a complex sequence descriptor (4 fixed words when
/// the jump-to-next field is zero).
#[inline]
pub(crate) fn next_after_complex_seq(ops: &[u32], idx: usize) -> usize {
    let jmp = ops::adr_jmp(ops[idx + 3]) as usize;
    idx + if jmp != 0 { jmp } else { 4 }
}

/// Applies a `JSR` delta to the cursor.
#[inline]
pub(crate) fn jsr_target(idx: usize, insn: u32) -> usize {
    (idx as i64 + ops::jump(insn) as i64) as usize
}
