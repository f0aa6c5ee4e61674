// Key extraction from full-data CDR: copying key fields, skipping complex
// non-key fields by their exact wire size, and keyhash derivation from
// wire data.

use crate::common::*;
use ddscdr::cdr::{Istream, Ostream, OstreamBe};
use ddscdr::walker::extract::{extract_key_from_data, extract_key_from_key, keyhash_from_wire};
use ddscdr::walker::write::{write_key, write_sample};

fn full_body<T>(topic: &ddscdr::Topic, sample: &T) -> Vec<u8> {
    let mut os: Ostream = Ostream::new();
    unsafe { write_sample(&mut os, sample as *const T as *const u8, topic) };
    os.into_vec()
}

#[test]
fn extracts_key_skipping_non_key_fields() {
    let topic = abs_topic();
    let sample = AbsSample::new(7, 0x0102_0304, "hi");
    let body = full_body(&topic, &sample);

    let mut is = Istream::new(&body);
    let mut os: Ostream = Ostream::new();
    extract_key_from_data(&mut is, &mut os, &topic);
    #[cfg(target_endian = "little")]
    assert_eq!(os.as_slice(), &[0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn extracted_key_matches_directly_written_key() {
    let topic = abs_topic();
    let sample = AbsSample::new(3, 0xaabb_ccdd, "something long enough");
    let body = full_body(&topic, &sample);

    let mut is = Istream::new(&body);
    let mut extracted: Ostream = Ostream::new();
    extract_key_from_data(&mut is, &mut extracted, &topic);

    let mut direct: Ostream = Ostream::new();
    unsafe { write_key(&mut direct, &sample as *const AbsSample as *const u8, &topic) };
    assert_eq!(extracted.as_slice(), direct.as_slice());
}

#[test]
fn big_endian_extraction_reencodes_primitives() {
    let topic = abs_topic();
    let sample = AbsSample::new(7, 0x0102_0304, "hi");
    let body = full_body(&topic, &sample);

    let mut is = Istream::new(&body);
    let mut os = OstreamBe::new();
    extract_key_from_data(&mut is, &mut os, &topic);
    assert_eq!(os.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn skips_sequences_arrays_and_unions_by_wire_size() {
    // Key placed after a sequence, a union, and a nested struct so that
    // extraction exercises each skip path.
    use ddscdr::ops::{self, TypeCode, OP_FLAG_KEY, OP_RTS};
    use ddscdr::sample::Sequence;
    use ddscdr::{DescriptorFlags, KeyDescriptor, Topic, TypeDescriptor};
    use std::mem::{align_of, offset_of, size_of};

    #[repr(C)]
    struct Mixed {
        seq: Sequence,
        d: u8,
        v: u32,
        tail_key: u16,
    }

    let ops_v = vec![
        // sequence<uint32> (non-key)
        ops::adr2(TypeCode::Seq, TypeCode::By4, 0),
        offset_of!(Mixed, seq) as u32,
        // union on uint8, one case (non-key)
        ops::adr2(TypeCode::Uni, TypeCode::By1, 0),
        offset_of!(Mixed, d) as u32,
        1,
        ops::jmp_jsr(7, 4),
        ops::jeq(TypeCode::By4, 0),
        1,
        offset_of!(Mixed, v) as u32,
        // @key uint16
        ops::adr(TypeCode::By2, OP_FLAG_KEY),
        offset_of!(Mixed, tail_key) as u32,
        OP_RTS,
    ];
    let topic = Topic::new(
        "Mixed",
        "Mixed",
        TypeDescriptor {
            size: size_of::<Mixed>() as u32,
            align: align_of::<Mixed>() as u32,
            flags: DescriptorFlags::FIXED_KEY,
            ops: ops_v,
            keys: vec![KeyDescriptor {
                name: "tail_key",
                index: 9,
            }],
        },
    );

    let mut sample = Mixed {
        seq: Sequence::empty(),
        d: 1,
        v: 0x5555_6666,
        tail_key: 0xabcd,
    };
    unsafe {
        ddscdr::sample::grow_sequence(&mut sample.seq, 3, 4, false);
        std::ptr::copy_nonoverlapping(
            [9u32, 8, 7].as_ptr() as *const u8,
            sample.seq.buffer,
            12,
        );
    }
    sample.seq.length = 3;

    let body = full_body(&topic, &sample);
    let mut is = Istream::new(&body);
    let mut os: Ostream = Ostream::new();
    extract_key_from_data(&mut is, &mut os, &topic);
    #[cfg(target_endian = "little")]
    assert_eq!(os.as_slice(), &[0xcd, 0xab]);

    unsafe { ddscdr::sample::free_sequence_buffer(&mut sample.seq, 4) };
}

#[test]
fn extract_from_key_only_body() {
    let topic = two_keys_topic();
    let sample = TwoKeysSample::new("a", "bb");
    let mut os: Ostream = Ostream::new();
    unsafe { write_key(&mut os, &sample as *const TwoKeysSample as *const u8, &topic) };
    let key_body = os.into_vec();

    let mut is = Istream::new(&key_body);
    let mut be = OstreamBe::new();
    extract_key_from_key(&mut is, &mut be, &topic);
    assert_eq!(
        be.as_slice(),
        &[
            0x00, 0x00, 0x00, 0x02, b'a', 0x00, //
            0x00, 0x00, //
            0x00, 0x00, 0x00, 0x03, b'b', b'b', 0x00,
        ]
    );
}

#[test]
fn wire_keyhash_fixed_key_is_literal_padded() {
    let topic = abs_topic();
    let sample = AbsSample::new(7, 0x0102_0304, "hi");
    let body = full_body(&topic, &sample);

    let mut is = Istream::new(&body);
    let kh = keyhash_from_wire(&mut is, &topic, false);
    assert!(kh.set && kh.iskey);
    assert_eq!(kh.keysize, 4);
    assert_eq!(
        kh.hash,
        [1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn wire_keyhash_md5_for_non_fixed_key() {
    let topic = two_keys_topic();
    let sample = TwoKeysSample::new("a", "bb");
    let body = full_body(&topic, &sample);

    let mut is = Istream::new(&body);
    let kh = keyhash_from_wire(&mut is, &topic, false);
    assert!(kh.set && !kh.iskey);
    assert_eq!(kh.keysize, 16);

    let be_key = [
        0x00u8, 0x00, 0x00, 0x02, b'a', 0x00, //
        0x00, 0x00, //
        0x00, 0x00, 0x00, 0x03, b'b', b'b', 0x00,
    ];
    assert_eq!(kh.hash, ddscdr::hash::md5(&be_key));
}

#[test]
fn wire_keyhash_matches_sample_keyhash() {
    let topic = abs_topic();
    let sample = AbsSample::new(1, 77, "x");
    let from_mem =
        unsafe { ddscdr::keyhash_from_sample(&topic, &sample as *const AbsSample as *const u8) };

    let body = full_body(&topic, &sample);
    let mut is = Istream::new(&body);
    let from_wire = keyhash_from_wire(&mut is, &topic, false);
    assert_eq!(from_mem, from_wire);
}

#[test]
fn keyless_topic_keyhash_is_zero() {
    let topic = union_topic();
    let mut sample = UniSample::zeroed();
    sample.d = 1;
    let body = full_body(&topic, &sample);
    let mut is = Istream::new(&body);
    let kh = keyhash_from_wire(&mut is, &topic, false);
    assert!(kh.set && kh.iskey);
    assert_eq!(kh.keysize, 0);
    assert_eq!(kh.hash, [0; 16]);
}
