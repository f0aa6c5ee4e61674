#![no_main]
use libfuzzer_sys::fuzz_target;

use std::mem::{align_of, offset_of, size_of};
use std::sync::{Arc, OnceLock};

use ddscdr::ops::{self, TypeCode, OP_FLAG_DEF, OP_FLAG_KEY, OP_RTS};
use ddscdr::sample::Sequence;
use ddscdr::walker::free::free_sample_contents;
use ddscdr::walker::normalize::normalize;
use ddscdr::walker::read::read_sample;
use ddscdr::{DescriptorFlags, KeyDescriptor, Topic, TypeDescriptor};

// A topic exercising every construct the walker knows: primitives, both
// string flavors, a primitive sequence, a union with a default case, and a
// primitive array.
#[repr(C)]
struct Everything {
    k: u32,
    t: u8,
    big: u64,
    s: *mut std::ffi::c_char,
    b: [u8; 12],
    seq: Sequence,
    d: u8,
    v_u32: u32,
    v_str: *mut std::ffi::c_char,
    arr: [u16; 3],
}

fn everything_topic() -> &'static Arc<Topic> {
    static TOPIC: OnceLock<Arc<Topic>> = OnceLock::new();
    TOPIC.get_or_init(|| {
        let ops_v = vec![
            ops::adr(TypeCode::By4, OP_FLAG_KEY),
            offset_of!(Everything, k) as u32,
            ops::adr(TypeCode::By1, 0),
            offset_of!(Everything, t) as u32,
            ops::adr(TypeCode::By8, 0),
            offset_of!(Everything, big) as u32,
            ops::adr(TypeCode::Str, 0),
            offset_of!(Everything, s) as u32,
            ops::adr(TypeCode::Bst, 0),
            offset_of!(Everything, b) as u32,
            12,
            ops::adr2(TypeCode::Seq, TypeCode::By2, 0),
            offset_of!(Everything, seq) as u32,
            // union: disc u8; case 1 → u32, case 2 → string, default → skip-less
            ops::adr2(TypeCode::Uni, TypeCode::By1, OP_FLAG_DEF),
            offset_of!(Everything, d) as u32,
            3,
            ops::jmp_jsr(13, 4),
            ops::jeq(TypeCode::By4, 0),
            1,
            offset_of!(Everything, v_u32) as u32,
            ops::jeq(TypeCode::Str, 0),
            2,
            offset_of!(Everything, v_str) as u32,
            ops::jeq(TypeCode::By1, 0),
            0,
            offset_of!(Everything, t) as u32,
            ops::adr2(TypeCode::Arr, TypeCode::By2, 0),
            offset_of!(Everything, arr) as u32,
            3,
            OP_RTS,
        ];
        Topic::new(
            "FuzzEverything",
            "Everything",
            TypeDescriptor {
                size: size_of::<Everything>() as u32,
                align: align_of::<Everything>() as u32,
                flags: DescriptorFlags::FIXED_KEY | DescriptorFlags::CONTAINS_UNION,
                ops: ops_v,
                keys: vec![KeyDescriptor { name: "k", index: 0 }],
            },
        )
    })
}

// Normalization over arbitrary bytes must never panic, and a buffer it
// accepts must deserialize without any out-of-bounds access (the read
// walkers index slices, so an overrun would abort the run).
fuzz_target!(|data: &[u8]| {
    let topic = everything_topic();
    for bswap in [false, true] {
        let mut body = data.to_vec();
        if normalize(&mut body, bswap, topic, false).is_ok() {
            // 8-aligned backing store: the walkers form references to
            // sequence headers at descriptor offsets.
            let mut sample = vec![0u64; size_of::<Everything>().div_ceil(8)];
            let sample_ptr = sample.as_mut_ptr() as *mut u8;
            let mut is = ddscdr::cdr::Istream::new(&body);
            unsafe {
                read_sample(&mut is, sample_ptr, topic);
                free_sample_contents(sample_ptr, &topic.descriptor.ops);
            }
        }
        // Key-only interpretation of the same bytes.
        let mut key_body = data.to_vec();
        let _ = normalize(&mut key_body, bswap, topic, true);
    }
});
