#![no_main]
use libfuzzer_sys::fuzz_target;

use std::mem::{align_of, offset_of, size_of};
use std::sync::{Arc, OnceLock};

use ddscdr::ops::{self, TypeCode, OP_FLAG_KEY, OP_RTS};
use ddscdr::{DescriptorFlags, KeyDescriptor, SampleKind, SerData, Topic, TypeDescriptor};

#[repr(C)]
struct Keyed {
    k: u64,
    a: u16,
    s: *mut std::ffi::c_char,
}

fn keyed_topic() -> &'static Arc<Topic> {
    static TOPIC: OnceLock<Arc<Topic>> = OnceLock::new();
    TOPIC.get_or_init(|| {
        Topic::new(
            "FuzzKeyed",
            "Keyed",
            TypeDescriptor {
                size: size_of::<Keyed>() as u32,
                align: align_of::<Keyed>() as u32,
                flags: DescriptorFlags::FIXED_KEY,
                ops: vec![
                    ops::adr(TypeCode::By8, OP_FLAG_KEY),
                    offset_of!(Keyed, k) as u32,
                    ops::adr(TypeCode::By2, 0),
                    offset_of!(Keyed, a) as u32,
                    ops::adr(TypeCode::Str, 0),
                    offset_of!(Keyed, s) as u32,
                    OP_RTS,
                ],
                keys: vec![KeyDescriptor { name: "k", index: 0 }],
            },
        )
    })
}

// Arbitrary header-prefixed payloads: ingestion either rejects them or
// yields a sample whose own wire image ingests to an identical body and
// keyhash.
fuzz_target!(|data: &[u8]| {
    let topic = keyed_topic();
    if let Ok(sd) = SerData::from_wire(topic, SampleKind::Data, data) {
        let wire = sd.to_wire();
        let sd2 = SerData::from_wire(topic, SampleKind::Data, &wire)
            .expect("re-ingesting an accepted sample cannot fail");
        assert_eq!(sd.cdr_body(), sd2.cdr_body());
        assert_eq!(sd.keyhash(), sd2.keyhash());
        assert_eq!(sd.hash_value(), sd2.hash_value());
    }
});
