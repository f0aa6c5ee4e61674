//! Read walker: deserializes a normalized native-endian CDR body into an
//! in-memory sample.
//!
//! The sample may be reused between reads; strings are reallocated and
//! sequence buffers grown as needed.  When the topic contains a union the
//! whole sample is freed and zeroed first — switching union cases with
//! pointer-valued alternatives cannot be done in place.

use std::ffi::c_char;
use std::ptr;

use crate::cdr::Istream;
use crate::ops::{self, TypeCode};
use crate::sample::{field_mut, grow_sequence, replace_string, write_field, Sequence};
use crate::topic::Topic;
use crate::walker::extract::skip_subtype;
use crate::walker::free::free_sample_contents;
use crate::walker::{find_union_case, jsr_target, next_after_complex_arr, next_after_complex_seq, skip_sequence_insns};

/// Deserializes a full sample.
///
/// # Safety
/// `data` must point at a zeroed or previously deserialized sample of this
/// topic's type, writable for the descriptor's full size.
pub unsafe fn read_sample(is: &mut Istream, data: *mut u8, topic: &Topic) {
    let desc = &topic.descriptor;
    if topic.opt_size() != 0 {
        let src = is.get_bytes(desc.size as usize, 1);
        ptr::copy_nonoverlapping(src.as_ptr(), data, src.len());
    } else {
        if desc.flags.contains(crate::ops::DescriptorFlags::CONTAINS_UNION) {
            // Reuse across union case switches is only safe from a clean
            // slate: release everything the sample owns, then zero it.
            free_sample_contents(data, &desc.ops);
            ptr::write_bytes(data, 0, desc.size as usize);
        }
        stream_read(is, data, &desc.ops, 0);
    }
}

/// Deserializes a key-only CDR into the key fields of a sample.
///
/// # Safety
/// Same contract as [`read_sample`].
pub unsafe fn read_key(is: &mut Istream, sample: *mut u8, topic: &Topic) {
    let ops_arr = &topic.descriptor.ops;
    for key in &topic.descriptor.keys {
        let idx = key.index as usize;
        let insn = ops_arr[idx];
        debug_assert!(ops::key_insn_ok(insn));
        let dst = field_mut(sample, ops_arr[idx + 1]);
        match ops::op_type(insn) {
            TypeCode::By1 => write_field::<u8>(dst, 0, is.get1()),
            TypeCode::By2 => write_field::<u16>(dst, 0, is.get2()),
            TypeCode::By4 => write_field::<u32>(dst, 0, is.get4()),
            TypeCode::By8 => write_field::<u64>(dst, 0, is.get8()),
            TypeCode::Str => read_string(is, dst as *mut *mut c_char),
            TypeCode::Bst => read_string_bound(is, dst, ops_arr[idx + 2]),
            TypeCode::Arr => {
                let num = ops_arr[idx + 2] as usize;
                let elem = ops::op_subtype(insn).prim_size() as usize;
                let src = is.get_bytes(num, elem);
                ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
            }
            TypeCode::Seq | TypeCode::Uni | TypeCode::Stu => {
                unreachable!("complex types cannot be key fields")
            }
        }
    }
}

/// Reads an unbounded string into a (re)allocated heap buffer.
unsafe fn read_string(is: &mut Istream, slot: *mut *mut c_char) {
    let len = is.get4() as usize;
    let bytes = is.get_bytes(len, 1);
    replace_string(slot, bytes);
}

/// Reads a bounded string into its inline buffer.  Normalization already
/// rejected values longer than the bound; the copy clamps anyway.
unsafe fn read_string_bound(is: &mut Istream, dst: *mut u8, bound: u32) {
    let len = is.get4() as usize;
    let bytes = is.get_bytes(len, 1);
    let n = len.min(bound as usize);
    ptr::copy_nonoverlapping(bytes.as_ptr(), dst, n);
}

/// The full-sample read dispatch loop.
///
/// # Safety
/// `data` must match the ops stream at `idx` per [`read_sample`].
pub(crate) unsafe fn stream_read(is: &mut Istream, data: *mut u8, ops_arr: &[u32], mut idx: usize) {
    loop {
        let insn = ops_arr[idx];
        if insn == ops::OP_RTS {
            return;
        }
        match ops::op(insn) {
            ops::OP_ADR => {
                let addr = field_mut(data, ops_arr[idx + 1]);
                match ops::op_type(insn) {
                    TypeCode::By1 => {
                        write_field::<u8>(addr, 0, is.get1());
                        idx += 2;
                    }
                    TypeCode::By2 => {
                        write_field::<u16>(addr, 0, is.get2());
                        idx += 2;
                    }
                    TypeCode::By4 => {
                        write_field::<u32>(addr, 0, is.get4());
                        idx += 2;
                    }
                    TypeCode::By8 => {
                        write_field::<u64>(addr, 0, is.get8());
                        idx += 2;
                    }
                    TypeCode::Str => {
                        read_string(is, addr as *mut *mut c_char);
                        idx += 2;
                    }
                    TypeCode::Bst => {
                        read_string_bound(is, addr, ops_arr[idx + 2]);
                        idx += 3;
                    }
                    TypeCode::Seq => idx = read_seq(is, addr, ops_arr, idx, insn),
                    TypeCode::Arr => idx = read_arr(is, addr, ops_arr, idx, insn),
                    TypeCode::Uni => idx = read_uni(is, addr, data, ops_arr, idx, insn),
                    TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
                }
            }
            ops::OP_JSR => {
                stream_read(is, data, ops_arr, jsr_target(idx, insn));
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
}

unsafe fn read_seq(is: &mut Istream, addr: *mut u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let seq = addr as *mut Sequence;
    let subtype = ops::op_subtype(insn);
    let num = is.get4();
    if num == 0 {
        (*seq).length = 0;
        return skip_sequence_insns(ops_arr, idx, insn);
    }

    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => {
            let elem = subtype.prim_size();
            grow_sequence(seq, num, elem, false);
            let len = num.min((*seq).maximum);
            (*seq).length = len;
            let src = is.get_bytes(len as usize, elem as usize);
            ptr::copy_nonoverlapping(src.as_ptr(), (*seq).buffer, src.len());
            if len < num {
                is.skip((num - len) as usize, elem as usize);
            }
            idx + 2
        }
        TypeCode::Str => {
            grow_sequence(seq, num, std::mem::size_of::<*mut c_char>() as u32, true);
            let len = num.min((*seq).maximum);
            (*seq).length = len;
            let ptrs = (*seq).buffer as *mut *mut c_char;
            for i in 0..len as usize {
                read_string(is, ptrs.add(i));
            }
            for _ in len..num {
                let sz = is.get4() as usize;
                is.skip(sz, 1);
            }
            idx + 2
        }
        TypeCode::Bst => {
            let elem = ops_arr[idx + 2];
            grow_sequence(seq, num, elem, false);
            let len = num.min((*seq).maximum);
            (*seq).length = len;
            for i in 0..len {
                read_string_bound(is, field_mut((*seq).buffer, i * elem), elem);
            }
            for _ in len..num {
                let sz = is.get4() as usize;
                is.skip(sz, 1);
            }
            idx + 3
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let elem = ops_arr[idx + 2];
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            grow_sequence(seq, num, elem, true);
            let len = num.min((*seq).maximum);
            (*seq).length = len;
            for i in 0..len {
                stream_read(is, field_mut((*seq).buffer, i * elem), ops_arr, sub);
            }
            if len < num {
                skip_subtype(is, num - len, subtype, ops_arr, Some(sub));
            }
            next_after_complex_seq(ops_arr, idx)
        }
    }
}

unsafe fn read_arr(is: &mut Istream, addr: *mut u8, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let num = ops_arr[idx + 2];
    match ops::op_subtype(insn) {
        t @ (TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8) => {
            let elem = t.prim_size() as usize;
            let src = is.get_bytes(num as usize, elem);
            ptr::copy_nonoverlapping(src.as_ptr(), addr, src.len());
            idx + 3
        }
        TypeCode::Str => {
            let ptrs = addr as *mut *mut c_char;
            for i in 0..num as usize {
                read_string(is, ptrs.add(i));
            }
            idx + 3
        }
        TypeCode::Bst => {
            let elem = ops_arr[idx + 4];
            for i in 0..num {
                read_string_bound(is, field_mut(addr, i * elem), elem);
            }
            idx + 5
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            let elem = ops_arr[idx + 4];
            for i in 0..num {
                stream_read(is, field_mut(addr, i * elem), ops_arr, sub);
            }
            next_after_complex_arr(ops_arr, idx)
        }
    }
}

unsafe fn read_uni(
    is: &mut Istream,
    discaddr: *mut u8,
    base: *mut u8,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> usize {
    let disc = match ops::op_subtype(insn) {
        TypeCode::By1 => {
            let d = is.get1();
            write_field::<u8>(discaddr, 0, d);
            d as u32
        }
        TypeCode::By2 => {
            let d = is.get2();
            write_field::<u16>(discaddr, 0, d);
            d as u32
        }
        TypeCode::By4 => {
            let d = is.get4();
            write_field::<u32>(discaddr, 0, d);
            d
        }
        _ => unreachable!("union discriminant must be an integer of at most 4 bytes"),
    };
    let case = find_union_case(ops_arr, idx, disc);
    let next = idx + ops::adr_jmp(ops_arr[idx + 3]) as usize;
    if let Some(case) = case {
        let valaddr = field_mut(base, ops_arr[case + 2]);
        match ops::jeq_type(ops_arr[case]) {
            TypeCode::By1 => write_field::<u8>(valaddr, 0, is.get1()),
            TypeCode::By2 => write_field::<u16>(valaddr, 0, is.get2()),
            TypeCode::By4 => write_field::<u32>(valaddr, 0, is.get4()),
            TypeCode::By8 => write_field::<u64>(valaddr, 0, is.get8()),
            TypeCode::Str => read_string(is, valaddr as *mut *mut c_char),
            TypeCode::Bst | TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
                stream_read(is, valaddr, ops_arr, case + ops::adr_jsr(ops_arr[case]) as usize);
            }
        }
    }
    next
}
