// Read-cursor behavior over normalized native-endian bodies.

use ddscdr::cdr::{Istream, Ostream};

fn body(build: impl FnOnce(&mut Ostream)) -> Vec<u8> {
    let mut os: Ostream = Ostream::new();
    build(&mut os);
    os.into_vec()
}

#[test]
fn reads_mirror_writes() {
    let b = body(|os| {
        os.put1(0x11);
        os.put2(0x2222);
        os.put4(0x3333_3333);
        os.put8(0x4444_4444_4444_4444);
    });
    let mut is = Istream::new(&b);
    assert_eq!(is.get1(), 0x11);
    assert_eq!(is.get2(), 0x2222);
    assert_eq!(is.get4(), 0x3333_3333);
    assert_eq!(is.get8(), 0x4444_4444_4444_4444);
    assert_eq!(is.pos(), b.len());
}

#[test]
fn align_skips_pad_bytes() {
    let b = body(|os| {
        os.put1(1);
        os.put4(2);
    });
    let mut is = Istream::new(&b);
    assert_eq!(is.get1(), 1);
    is.align(4);
    assert_eq!(is.pos(), 4);
    assert_eq!(is.get4(), 2);
}

#[test]
fn get_bytes_aligns_then_slices() {
    let b = body(|os| {
        os.put1(9);
        os.put_bytes_aligned(&[1, 0, 2, 0], 2);
    });
    let mut is = Istream::new(&b);
    assert_eq!(is.get1(), 9);
    let s = is.get_bytes(2, 2);
    assert_eq!(s, &[1, 0, 2, 0]);
}

#[test]
fn skip_advances_without_reading() {
    let b = body(|os| {
        os.put4(1);
        os.put4(2);
    });
    let mut is = Istream::new(&b);
    is.skip(1, 4);
    assert_eq!(is.get4(), 2);
}

#[test]
fn remaining_views_the_tail() {
    let b = body(|os| {
        os.put1(1);
        os.put1(2);
        os.put1(3);
    });
    let mut is = Istream::new(&b);
    let _ = is.get1();
    assert_eq!(is.remaining(), &[2, 3]);
}
