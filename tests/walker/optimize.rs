// The memcpy fast path: detection by the ops scan and byte-for-byte
// agreement with the interpreted walker.

use crate::common::*;
use ddscdr::cdr::{Istream, Ostream};
use ddscdr::topic::check_optimize;
use ddscdr::walker::read::read_sample;
use ddscdr::walker::write::write_sample;
use std::mem::size_of;

#[test]
fn detects_naturally_aligned_primitive_layout() {
    let topic = flat_topic();
    assert_eq!(topic.opt_size(), size_of::<FlatSample>() as u32);
}

#[test]
fn no_optimize_flag_disables_the_fast_path() {
    let topic = flat_topic_no_opt();
    assert_eq!(topic.opt_size(), 0);
}

#[test]
fn strings_disqualify_the_fast_path() {
    let topic = abs_topic();
    assert_eq!(topic.opt_size(), 0);
}

#[test]
fn sequences_disqualify_the_fast_path() {
    let topic = sequ16_topic();
    assert_eq!(topic.opt_size(), 0);
}

#[test]
fn misaligned_field_disqualifies_the_fast_path() {
    use ddscdr::ops::{self, TypeCode, OP_RTS};
    use ddscdr::{DescriptorFlags, TypeDescriptor};
    // A uint32 at offset 2 cannot be a straight copy of the wire image.
    let desc = TypeDescriptor {
        size: 8,
        align: 4,
        flags: DescriptorFlags::empty(),
        ops: vec![
            ops::adr(TypeCode::By2, 0),
            0,
            ops::adr(TypeCode::By4, 0),
            2,
            OP_RTS,
        ],
        keys: vec![],
    };
    assert_eq!(check_optimize(&desc), 0);
}

#[test]
fn fast_path_and_walker_produce_identical_bodies() {
    let sample = FlatSample {
        x: 0x01020304,
        _pad: 0,
        y: 0x1112131415161718,
        a: [1, 2, 3, 4],
    };
    let fast = {
        let mut os: Ostream = Ostream::new();
        unsafe {
            write_sample(&mut os, &sample as *const FlatSample as *const u8, &flat_topic())
        };
        os.into_vec()
    };
    let slow = {
        let mut os: Ostream = Ostream::new();
        unsafe {
            write_sample(
                &mut os,
                &sample as *const FlatSample as *const u8,
                &flat_topic_no_opt(),
            )
        };
        os.into_vec()
    };
    assert_eq!(fast, slow);
}

#[test]
fn fast_path_roundtrip() {
    let topic = flat_topic();
    let src = FlatSample {
        x: 5,
        _pad: 0,
        y: 6,
        a: [7, 8, 9, 10],
    };
    let mut os: Ostream = Ostream::new();
    unsafe { write_sample(&mut os, &src as *const FlatSample as *const u8, &topic) };
    let body = os.into_vec();

    let mut dst = FlatSample::default();
    let mut is = Istream::new(&body);
    unsafe { read_sample(&mut is, &mut dst as *mut FlatSample as *mut u8, &topic) };
    assert_eq!(dst, src);
}

#[test]
fn fast_and_interpreted_reads_agree() {
    let src = FlatSample {
        x: 0xa1a2a3a4,
        _pad: 0,
        y: 0xb1b2b3b4b5b6b7b8,
        a: [11, 22, 33, 44],
    };
    let mut os: Ostream = Ostream::new();
    unsafe {
        write_sample(&mut os, &src as *const FlatSample as *const u8, &flat_topic_no_opt())
    };
    let body = os.into_vec();

    let mut via_fast = FlatSample::default();
    let mut is = Istream::new(&body);
    unsafe { read_sample(&mut is, &mut via_fast as *mut FlatSample as *mut u8, &flat_topic()) };

    let mut via_walker = FlatSample::default();
    let mut is = Istream::new(&body);
    unsafe {
        read_sample(
            &mut is,
            &mut via_walker as *mut FlatSample as *mut u8,
            &flat_topic_no_opt(),
        )
    };
    assert_eq!(via_fast, src);
    assert_eq!(via_walker, src);
}
