//! Releases everything a sample owns — heap strings and sequence buffers —
//! following the instruction stream, leaving the fixed-size part of the
//! sample intact.
//!
//! Used before reusing a sample whose topic contains a union (the read
//! walker must start from a clean slate) and by owners tearing a sample
//! down.

use std::ffi::c_char;

use crate::ops::{self, TypeCode};
use crate::sample::{field_mut, free_sequence_buffer, free_string, read_field, Sequence};
use crate::walker::{find_union_case, jsr_target, next_after_complex_arr, next_after_complex_seq};

/// Frees all owned contents reachable from `data` per the instruction
/// stream and nulls the freed pointers.
///
/// # Safety
/// `data` must point at a zeroed or previously deserialized sample matching
/// the stream — every string slot null or owned, every sequence header
/// consistent with its buffer.
pub unsafe fn free_sample_contents(data: *mut u8, ops_arr: &[u32]) {
    free1(data, ops_arr, 0);
}

unsafe fn free_string_slot(slot: *mut *mut c_char) {
    free_string(*slot);
    *slot = std::ptr::null_mut();
}

unsafe fn free1(data: *mut u8, ops_arr: &[u32], mut idx: usize) {
    loop {
        let insn = ops_arr[idx];
        if insn == ops::OP_RTS {
            return;
        }
        match ops::op(insn) {
            ops::OP_ADR => {
                let addr = field_mut(data, ops_arr[idx + 1]);
                match ops::op_type(insn) {
                    TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => idx += 2,
                    TypeCode::Str => {
                        free_string_slot(addr as *mut *mut c_char);
                        idx += 2;
                    }
                    TypeCode::Bst => idx += 3,
                    TypeCode::Seq => idx = free_seq(addr, ops_arr, idx, insn),
                    TypeCode::Arr => idx = free_arr(addr, ops_arr, idx, insn),
                    TypeCode::Uni => idx = free_uni(addr, data, ops_arr, idx, insn),
                    TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
                }
            }
            ops::OP_JSR => {
                free1(data, ops_arr, jsr_target(idx, insn));
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
}

unsafe fn free_seq(addr: *mut u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let seq = addr as *mut Sequence;
    let subtype = ops::op_subtype(insn);
    match subtype {
        t @ (TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8) => {
            free_sequence_buffer(seq, t.prim_size());
            idx + 2
        }
        TypeCode::Str => {
            // String buffers are zero-initialized on allocation, so every
            // slot up to the capacity is null or owned.
            let ptrs = (*seq).buffer as *mut *mut c_char;
            for i in 0..(*seq).maximum as usize {
                free_string_slot(ptrs.add(i));
            }
            free_sequence_buffer(seq, std::mem::size_of::<*mut c_char>() as u32);
            idx + 2
        }
        TypeCode::Bst => {
            let elem = ops_arr[idx + 2];
            free_sequence_buffer(seq, elem);
            idx + 3
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let elem = ops_arr[idx + 2];
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            for i in 0..(*seq).maximum {
                free1(field_mut((*seq).buffer, i * elem), ops_arr, sub);
            }
            free_sequence_buffer(seq, elem);
            next_after_complex_seq(ops_arr, idx)
        }
    }
}

unsafe fn free_arr(addr: *mut u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let num = ops_arr[idx + 2];
    match ops::op_subtype(insn) {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => idx + 3,
        TypeCode::Str => {
            let ptrs = addr as *mut *mut c_char;
            for i in 0..num as usize {
                free_string_slot(ptrs.add(i));
            }
            idx + 3
        }
        TypeCode::Bst => idx + 5,
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            let elem = ops_arr[idx + 4];
            for i in 0..num {
                free1(field_mut(addr, i * elem), ops_arr, sub);
            }
            next_after_complex_arr(ops_arr, idx)
        }
    }
}

unsafe fn free_uni(discaddr: *mut u8, base: *mut u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let disc = match ops::op_subtype(insn) {
        TypeCode::By1 => read_field::<u8>(discaddr, 0) as u32,
        TypeCode::By2 => read_field::<u16>(discaddr, 0) as u32,
        TypeCode::By4 => read_field::<u32>(discaddr, 0),
        _ => unreachable!("union discriminant must be an integer of at most 4 bytes"),
    };
    if let Some(case) = find_union_case(ops_arr, idx, disc) {
        let valaddr = field_mut(base, ops_arr[case + 2]);
        match ops::jeq_type(ops_arr[case]) {
            TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 | TypeCode::Bst => {}
            TypeCode::Str => free_string_slot(valaddr as *mut *mut c_char),
            TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
                free1(valaddr, ops_arr, case + ops::adr_jsr(ops_arr[case]) as usize);
            }
        }
    }
    idx + ops::adr_jmp(ops_arr[idx + 3]) as usize
}
