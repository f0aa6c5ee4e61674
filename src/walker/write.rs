//! Write walker: serializes an in-memory sample (or just its key fields)
//! into a CDR stream.
//!
//! Full-sample writes always target the native-endian stream; key writes
//! are endian-parametric because keyhash derivation needs the same walk in
//! big-endian.

use byteorder::ByteOrder;
use std::ffi::{c_char, CStr};
use std::slice;

use crate::cdr::Ostream;
use crate::ops::{self, TypeCode};
use crate::sample::{field_ptr, read_field, Sequence};
use crate::topic::Topic;
use crate::walker::{find_union_case, jsr_target, next_after_complex_arr, next_after_complex_seq, skip_sequence_insns};

/// Serializes a full sample.  Uses the bulk-copy fast path when the type
/// qualifies and the stream is aligned for the struct.
///
/// # Safety
/// `data` must point at a live sample laid out per the topic's descriptor.
/// For bulk-copyable types every byte of the struct must be initialized
/// (the descriptor covers padding with explicit filler fields).
pub unsafe fn write_sample(os: &mut Ostream, data: *const u8, topic: &Topic) {
    let desc = &topic.descriptor;
    if topic.opt_size() != 0 && desc.align != 0 && os.pos() % desc.align as usize == 0 {
        os.put_bytes(slice::from_raw_parts(data, desc.size as usize));
    } else {
        stream_write(os, data, &desc.ops, 0);
    }
}

/// Serializes only the key fields, in key order.
///
/// # Safety
/// `sample` must point at a live sample laid out per the topic's descriptor.
pub unsafe fn write_key<B: ByteOrder>(os: &mut Ostream<B>, sample: *const u8, topic: &Topic) {
    let ops_arr = &topic.descriptor.ops;
    for key in &topic.descriptor.keys {
        let idx = key.index as usize;
        let insn = ops_arr[idx];
        debug_assert!(ops::key_insn_ok(insn));
        let src = field_ptr(sample, ops_arr[idx + 1]);
        match ops::op_type(insn) {
            TypeCode::By1 => os.put1(read_field::<u8>(src, 0)),
            TypeCode::By2 => os.put2(read_field::<u16>(src, 0)),
            TypeCode::By4 => os.put4(read_field::<u32>(src, 0)),
            TypeCode::By8 => os.put8(read_field::<u64>(src, 0)),
            TypeCode::Str => write_string_field(os, read_field::<*const c_char>(src, 0)),
            TypeCode::Bst => write_string_field(os, src as *const c_char),
            TypeCode::Arr => {
                let num = ops_arr[idx + 2];
                write_prim_array(os, src, num, ops::op_subtype(insn));
            }
            TypeCode::Seq | TypeCode::Uni | TypeCode::Stu => {
                unreachable!("complex types cannot be key fields")
            }
        }
    }
}

/// Emits a string field; a null pointer serializes like the empty string.
#[inline]
unsafe fn write_string_field<B: ByteOrder>(os: &mut Ostream<B>, p: *const c_char) {
    let s = if p.is_null() {
        None
    } else {
        Some(CStr::from_ptr(p))
    };
    os.write_string(s);
}

/// Element-wise primitive array write; each element is aligned and encoded
/// in the stream's byte order.
unsafe fn write_prim_array<B: ByteOrder>(
    os: &mut Ostream<B>,
    src: *const u8,
    num: u32,
    subtype: TypeCode,
) {
    match subtype {
        TypeCode::By1 => os.put_bytes_aligned(slice::from_raw_parts(src, num as usize), 1),
        TypeCode::By2 => {
            for i in 0..num {
                os.put2(read_field::<u16>(src, i * 2));
            }
        }
        TypeCode::By4 => {
            for i in 0..num {
                os.put4(read_field::<u32>(src, i * 4));
            }
        }
        TypeCode::By8 => {
            for i in 0..num {
                os.put8(read_field::<u64>(src, i * 8));
            }
        }
        _ => unreachable!("primitive array subtype"),
    }
}

/// The full-sample write dispatch loop.
///
/// # Safety
/// `data` must point at a live sample matching the ops stream at `idx`.
pub(crate) unsafe fn stream_write(os: &mut Ostream, data: *const u8, ops_arr: &[u32], mut idx: usize) {
    loop {
        let insn = ops_arr[idx];
        if insn == ops::OP_RTS {
            return;
        }
        match ops::op(insn) {
            ops::OP_ADR => {
                let addr = field_ptr(data, ops_arr[idx + 1]);
                match ops::op_type(insn) {
                    TypeCode::By1 => {
                        os.put1(read_field::<u8>(addr, 0));
                        idx += 2;
                    }
                    TypeCode::By2 => {
                        os.put2(read_field::<u16>(addr, 0));
                        idx += 2;
                    }
                    TypeCode::By4 => {
                        os.put4(read_field::<u32>(addr, 0));
                        idx += 2;
                    }
                    TypeCode::By8 => {
                        os.put8(read_field::<u64>(addr, 0));
                        idx += 2;
                    }
                    TypeCode::Str => {
                        write_string_field(os, read_field::<*const c_char>(addr, 0));
                        idx += 2;
                    }
                    TypeCode::Bst => {
                        write_string_field(os, addr as *const c_char);
                        idx += 3;
                    }
                    TypeCode::Seq => idx = write_seq(os, addr, ops_arr, idx, insn),
                    TypeCode::Arr => idx = write_arr(os, addr, ops_arr, idx, insn),
                    TypeCode::Uni => idx = write_uni(os, addr, data, ops_arr, idx, insn),
                    TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
                }
            }
            ops::OP_JSR => {
                stream_write(os, data, ops_arr, jsr_target(idx, insn));
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
}

unsafe fn write_seq(os: &mut Ostream, addr: *const u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let seq = &*(addr as *const Sequence);
    let num = seq.length;

    os.put4(num);
    if num == 0 {
        return skip_sequence_insns(ops_arr, idx, insn);
    }

    // Following the length the stream is 4-aligned.
    match ops::op_subtype(insn) {
        t @ (TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8) => {
            let elem = t.prim_size() as usize;
            os.put_bytes_aligned(slice::from_raw_parts(seq.buffer, num as usize * elem), elem);
            idx + 2
        }
        TypeCode::Str => {
            let ptrs = seq.buffer as *const *const c_char;
            for i in 0..num as usize {
                write_string_field(os, *ptrs.add(i));
            }
            idx + 2
        }
        TypeCode::Bst => {
            let elem = ops_arr[idx + 2];
            for i in 0..num {
                write_string_field(os, field_ptr(seq.buffer, i * elem) as *const c_char);
            }
            idx + 3
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let elem = ops_arr[idx + 2];
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            for i in 0..num {
                stream_write(os, field_ptr(seq.buffer, i * elem), ops_arr, sub);
            }
            next_after_complex_seq(ops_arr, idx)
        }
    }
}

unsafe fn write_arr(os: &mut Ostream, addr: *const u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let num = ops_arr[idx + 2];
    match ops::op_subtype(insn) {
        t @ (TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8) => {
            let elem = t.prim_size() as usize;
            os.put_bytes_aligned(slice::from_raw_parts(addr, num as usize * elem), elem);
            idx + 3
        }
        TypeCode::Str => {
            let ptrs = addr as *const *const c_char;
            for i in 0..num as usize {
                write_string_field(os, *ptrs.add(i));
            }
            idx + 3
        }
        TypeCode::Bst => {
            let elem = ops_arr[idx + 4];
            for i in 0..num {
                write_string_field(os, field_ptr(addr, i * elem) as *const c_char);
            }
            idx + 5
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            let elem = ops_arr[idx + 4];
            for i in 0..num {
                stream_write(os, field_ptr(addr, i * elem), ops_arr, sub);
            }
            next_after_complex_arr(ops_arr, idx)
        }
    }
}

unsafe fn write_uni(
    os: &mut Ostream,
    discaddr: *const u8,
    base: *const u8,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> usize {
    let disc = match ops::op_subtype(insn) {
        TypeCode::By1 => {
            let d = read_field::<u8>(discaddr, 0);
            os.put1(d);
            d as u32
        }
        TypeCode::By2 => {
            let d = read_field::<u16>(discaddr, 0);
            os.put2(d);
            d as u32
        }
        TypeCode::By4 => {
            let d = read_field::<u32>(discaddr, 0);
            os.put4(d);
            d
        }
        _ => unreachable!("union discriminant must be an integer of at most 4 bytes"),
    };
    let case = find_union_case(ops_arr, idx, disc);
    let next = idx + ops::adr_jmp(ops_arr[idx + 3]) as usize;
    if let Some(case) = case {
        // Case offsets are relative to the enclosing struct base.
        let valaddr = field_ptr(base, ops_arr[case + 2]);
        match ops::jeq_type(ops_arr[case]) {
            TypeCode::By1 => os.put1(read_field::<u8>(valaddr, 0)),
            TypeCode::By2 => os.put2(read_field::<u16>(valaddr, 0)),
            TypeCode::By4 => os.put4(read_field::<u32>(valaddr, 0)),
            TypeCode::By8 => os.put8(read_field::<u64>(valaddr, 0)),
            TypeCode::Str => write_string_field(os, read_field::<*const c_char>(valaddr, 0)),
            TypeCode::Bst => write_string_field(os, valaddr as *const c_char),
            TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
                stream_write(os, valaddr, ops_arr, case + ops::adr_jsr(ops_arr[case]) as usize);
            }
        }
    }
    next
}
