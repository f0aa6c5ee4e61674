// Pretty-printing: struct/array/union forms, quoted strings, printable
// runs in byte arrays, and clean truncation on a full buffer.

use crate::common::*;
use ddscdr::cdr::{Istream, Ostream};
use ddscdr::walker::print::{print_key, print_sample};
use ddscdr::walker::write::{write_key, write_sample};

fn render<T>(topic: &ddscdr::Topic, sample: &T, limit: usize) -> (String, usize) {
    let mut os: Ostream = Ostream::new();
    unsafe { write_sample(&mut os, sample as *const T as *const u8, topic) };
    let body = os.into_vec();
    let mut is = Istream::new(&body);
    let mut out = String::new();
    let left = print_sample(&mut is, topic, &mut out, limit);
    (out, left)
}

#[test]
fn struct_prints_braced_fields() {
    let topic = abs_topic();
    let sample = AbsSample::new(7, 260, "hi");
    let (out, _) = render(&topic, &sample, 256);
    assert_eq!(out, "{7,260,\"hi\"}");
}

#[test]
fn sequence_prints_braced_elements() {
    let topic = sequ16_topic();
    let sample = SeqU16Sample::with_elems(1, &[5, 6, 7]);
    let (out, _) = render(&topic, &sample, 256);
    assert_eq!(out, "{1,{5,6,7}}");
}

#[test]
fn empty_sequence_prints_empty_braces() {
    let topic = sequ16_topic();
    let sample = SeqU16Sample::zeroed();
    let (out, _) = render(&topic, &sample, 256);
    assert_eq!(out, "{0,{}}");
}

#[test]
fn union_prints_disc_and_value() {
    let topic = union_topic();
    let mut sample = UniSample::zeroed();
    sample.d = 1;
    sample.v_u32 = 99;
    let (out, _) = render(&topic, &sample, 256);
    assert_eq!(out, "{1:99}");
}

#[test]
fn union_string_case_prints_quoted() {
    let topic = union_topic();
    let mut sample = UniSample::zeroed();
    sample.d = 2;
    sample.v_str = std::ffi::CString::new("txt").unwrap().into_raw();
    let (out, _) = render(&topic, &sample, 256);
    assert_eq!(out, "{2:\"txt\"}");
}

#[test]
fn nested_struct_prints_inner_braces() {
    let topic = nested_topic();
    let mut sample = NestedSample::zeroed();
    sample.x = 1;
    sample.inner.a = 2;
    sample.inner.s = std::ffi::CString::new("s").unwrap().into_raw();
    sample.y = 3;
    let (out, _) = render(&topic, &sample, 256);
    assert_eq!(out, "{1,{2,\"s\"},3}");
}

#[test]
fn byte_array_printable_run_renders_quoted() {
    use ddscdr::ops::{self, TypeCode, OP_RTS};
    use ddscdr::{DescriptorFlags, Topic, TypeDescriptor};

    #[repr(C)]
    struct Blob {
        b: [u8; 8],
    }
    let topic = Topic::new(
        "Blob",
        "Blob",
        TypeDescriptor {
            size: 8,
            align: 1,
            flags: DescriptorFlags::NO_OPTIMIZE,
            ops: vec![ops::adr2(TypeCode::Arr, TypeCode::By1, 0), 0, 8, OP_RTS],
            keys: vec![],
        },
    );
    let sample = Blob { b: *b"text\x01\x02ab" };
    let (out, _) = render(&topic, &sample, 256);
    // Four printable bytes quote; the two control bytes print as numbers;
    // the trailing two are below the run threshold.
    assert_eq!(out, "{{\"text\",1,2,97,98}}");
}

#[test]
fn truncation_stops_cleanly_and_reports_zero_remaining() {
    let topic = abs_topic();
    let sample = AbsSample::new(200, 123456, "a-rather-long-payload");
    let (out, left) = render(&topic, &sample, 8);
    assert_eq!(left, 0);
    assert!(out.len() <= 8);
    assert!(out.starts_with('{'));
}

#[test]
fn key_rendering_uses_key_marker() {
    let topic = abs_topic();
    let sample = AbsSample::new(7, 42, "hi");
    let mut os: Ostream = Ostream::new();
    unsafe { write_key(&mut os, &sample as *const AbsSample as *const u8, &topic) };
    let body = os.into_vec();
    let mut is = Istream::new(&body);
    let mut out = String::new();
    print_key(&mut is, &topic, &mut out, 256);
    assert_eq!(out, ":k:{42}");
}
