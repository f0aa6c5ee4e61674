//! Human-readable rendering of serialized samples.
//!
//! Produces `{field1,field2,…}` for structs, `{e1,e2,…}` for arrays and
//! sequences, and `discval:value` for unions, reading straight from the
//! normalized CDR body.  Output goes into a caller-supplied buffer with a
//! byte budget; rendering stops cleanly when the budget is exhausted and
//! the remaining capacity is returned.

use std::fmt::Write as _;

use crate::cdr::Istream;
use crate::ops::{self, TypeCode};
use crate::topic::Topic;
use crate::walker::{find_union_case, jsr_target, next_after_complex_arr, next_after_complex_seq, skip_sequence_insns};

/// Bounded text sink: every put truncates to the remaining budget.
struct Printer<'a> {
    out: &'a mut String,
    remaining: usize,
}

impl Printer<'_> {
    /// Appends `s`, truncated to the budget.  Returns true while budget
    /// remains.
    fn put(&mut self, s: &str) -> bool {
        if self.remaining == 0 {
            return false;
        }
        if s.len() <= self.remaining {
            self.out.push_str(s);
            self.remaining -= s.len();
        } else {
            let mut end = self.remaining;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            self.out.push_str(&s[..end]);
            self.remaining = 0;
        }
        self.remaining > 0
    }

    fn putf(&mut self, args: std::fmt::Arguments<'_>) -> bool {
        let mut tmp = String::new();
        let _ = tmp.write_fmt(args);
        self.put(&tmp)
    }
}

/// Minimum run of printable bytes worth rendering as a quoted substring
/// inside a byte array.
const PRINTABLE_RUN_MIN: usize = 4;

fn printable_run_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|&&b| b != b'"' && (b.is_ascii_graphic() || b == b' '))
        .count()
}

fn print_simple(pr: &mut Printer<'_>, is: &mut Istream, ty: TypeCode) -> bool {
    match ty {
        TypeCode::By1 => pr.putf(format_args!("{}", is.get1())),
        TypeCode::By2 => pr.putf(format_args!("{}", is.get2())),
        TypeCode::By4 => pr.putf(format_args!("{}", is.get4())),
        TypeCode::By8 => pr.putf(format_args!("{}", is.get8())),
        TypeCode::Str | TypeCode::Bst => {
            let sz = is.get4() as usize;
            let bytes = is.get_bytes(sz, 1);
            let text = String::from_utf8_lossy(&bytes[..sz.saturating_sub(1)]);
            pr.putf(format_args!("\"{text}\""))
        }
        _ => unreachable!("compound type in print_simple"),
    }
}

fn print_simple_array(pr: &mut Printer<'_>, is: &mut Istream, num: usize, ty: TypeCode) -> bool {
    let mut cont = pr.put("{");
    match ty {
        TypeCode::By1 => {
            // Byte arrays often carry text; render printable runs quoted.
            let mut i = 0usize;
            while cont && i < num {
                let m = printable_run_len(&is.remaining()[..num - i]);
                if m >= PRINTABLE_RUN_MIN {
                    cont = pr.put(if i != 0 { ",\"" } else { "\"" });
                    let run = is.get_bytes(m, 1);
                    if cont {
                        cont = pr.putf(format_args!("{}", String::from_utf8_lossy(run)));
                    }
                    if cont {
                        cont = pr.put("\"");
                    }
                    i += m;
                } else {
                    if i != 0 {
                        pr.put(",");
                    }
                    cont = print_simple(pr, is, ty);
                    i += 1;
                }
            }
        }
        TypeCode::By2
        | TypeCode::By4
        | TypeCode::By8
        | TypeCode::Str
        | TypeCode::Bst => {
            for i in 0..num {
                if !cont {
                    break;
                }
                if i != 0 {
                    pr.put(",");
                }
                cont = print_simple(pr, is, ty);
            }
        }
        _ => unreachable!("compound type in print_simple_array"),
    }
    pr.put("}")
}

fn print_seq(
    pr: &mut Printer<'_>,
    is: &mut Istream,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> usize {
    let subtype = ops::op_subtype(insn);
    let num = is.get4() as usize;
    if num == 0 {
        pr.put("{}");
        return skip_sequence_insns(ops_arr, idx, insn);
    }
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => {
            print_simple_array(pr, is, num, subtype);
            idx + 2
        }
        TypeCode::Str | TypeCode::Bst => {
            print_simple_array(pr, is, num, subtype);
            idx + if subtype == TypeCode::Str { 2 } else { 3 }
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            let mut cont = pr.put("{");
            for i in 0..num {
                if !cont {
                    break;
                }
                if i > 0 {
                    pr.put(",");
                }
                cont = print1(pr, is, ops_arr, sub, subtype == TypeCode::Stu);
            }
            pr.put("}");
            next_after_complex_seq(ops_arr, idx)
        }
    }
}

fn print_arr(
    pr: &mut Printer<'_>,
    is: &mut Istream,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> usize {
    let subtype = ops::op_subtype(insn);
    let num = ops_arr[idx + 2] as usize;
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => {
            print_simple_array(pr, is, num, subtype);
            idx + 3
        }
        TypeCode::Str | TypeCode::Bst => {
            print_simple_array(pr, is, num, subtype);
            idx + if subtype == TypeCode::Str { 3 } else { 5 }
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            let mut cont = pr.put("{");
            for i in 0..num {
                if !cont {
                    break;
                }
                if i > 0 {
                    pr.put(",");
                }
                cont = print1(pr, is, ops_arr, sub, subtype == TypeCode::Stu);
            }
            pr.put("}");
            next_after_complex_arr(ops_arr, idx)
        }
    }
}

fn print_uni(
    pr: &mut Printer<'_>,
    is: &mut Istream,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> usize {
    let disc = match ops::op_subtype(insn) {
        TypeCode::By1 => is.get1() as u32,
        TypeCode::By2 => is.get2() as u32,
        TypeCode::By4 => is.get4(),
        _ => unreachable!("union discriminant must be an integer of at most 4 bytes"),
    };
    let case = find_union_case(ops_arr, idx, disc);
    pr.putf(format_args!("{disc}:"));
    let next = idx + ops::adr_jmp(ops_arr[idx + 3]) as usize;
    if let Some(case) = case {
        let valtype = ops::jeq_type(ops_arr[case]);
        match valtype {
            TypeCode::By1
            | TypeCode::By2
            | TypeCode::By4
            | TypeCode::By8
            | TypeCode::Str
            | TypeCode::Bst => {
                print_simple(pr, is, valtype);
            }
            TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
                print1(
                    pr,
                    is,
                    ops_arr,
                    case + ops::adr_jsr(ops_arr[case]) as usize,
                    valtype == TypeCode::Stu,
                );
            }
        }
    }
    next
}

fn print1(pr: &mut Printer<'_>, is: &mut Istream, ops_arr: &[u32], mut idx: usize, add_braces: bool) -> bool {
    let mut cont = true;
    let mut needs_comma = false;
    if add_braces {
        pr.put("{");
    }
    loop {
        let insn = ops_arr[idx];
        if !cont || insn == ops::OP_RTS {
            break;
        }
        if needs_comma {
            pr.put(",");
        }
        needs_comma = true;
        match ops::op(insn) {
            ops::OP_ADR => match ops::op_type(insn) {
                t @ (TypeCode::By1
                | TypeCode::By2
                | TypeCode::By4
                | TypeCode::By8
                | TypeCode::Str) => {
                    cont = print_simple(pr, is, t);
                    idx += 2;
                }
                TypeCode::Bst => {
                    cont = print_simple(pr, is, TypeCode::Bst);
                    idx += 3;
                }
                TypeCode::Seq => idx = print_seq(pr, is, ops_arr, idx, insn),
                TypeCode::Arr => idx = print_arr(pr, is, ops_arr, idx, insn),
                TypeCode::Uni => idx = print_uni(pr, is, ops_arr, idx, insn),
                TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
            },
            ops::OP_JSR => {
                cont = print1(pr, is, ops_arr, jsr_target(idx, insn), true);
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
    if add_braces {
        pr.put("}");
    }
    cont
}

/// Renders a full-data body into `out` within `limit` bytes; returns the
/// unused budget.
pub fn print_sample(is: &mut Istream, topic: &Topic, out: &mut String, limit: usize) -> usize {
    let mut pr = Printer {
        out,
        remaining: limit,
    };
    print1(&mut pr, is, &topic.descriptor.ops, 0, true);
    pr.remaining
}

/// Renders a key-only body into `out` within `limit` bytes; returns the
/// unused budget.
pub fn print_key(is: &mut Istream, topic: &Topic, out: &mut String, limit: usize) -> usize {
    let ops_arr = &topic.descriptor.ops;
    let mut pr = Printer {
        out,
        remaining: limit,
    };
    let mut cont = pr.put(":k:{");
    for (i, key) in topic.descriptor.keys.iter().enumerate() {
        if !cont {
            break;
        }
        if i > 0 {
            pr.put(",");
        }
        let idx = key.index as usize;
        let insn = ops_arr[idx];
        debug_assert!(ops::key_insn_ok(insn));
        match ops::op_type(insn) {
            t @ (TypeCode::By1
            | TypeCode::By2
            | TypeCode::By4
            | TypeCode::By8
            | TypeCode::Str
            | TypeCode::Bst) => cont = print_simple(&mut pr, is, t),
            TypeCode::Arr => {
                cont = print_simple_array(
                    &mut pr,
                    is,
                    ops_arr[idx + 2] as usize,
                    ops::op_subtype(insn),
                )
            }
            TypeCode::Seq | TypeCode::Uni | TypeCode::Stu => {
                unreachable!("complex types cannot be key fields")
            }
        }
    }
    pr.put("}");
    pr.remaining
}
