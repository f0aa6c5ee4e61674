//! In-memory sample model.
//!
//! A sample is an opaque block of memory whose layout is described entirely
//! by the topic's [`crate::ops::TypeDescriptor`]: scalars, inline arrays,
//! bounded strings and unions sit at fixed offsets; unbounded strings and
//! sequence buffers are owned heap pointers reached through those offsets.
//! The walkers address fields as `base + offset`, so everything here is raw
//! pointer plumbing with the descriptor as the safety contract.
//!
//! Ownership rules:
//! - unbounded strings are NUL-terminated heap allocations created with
//!   [`CString::into_raw`] and released with [`CString::from_raw`];
//! - sequence buffers are 8-aligned `std::alloc` blocks owned by the sample
//!   when the sequence's `release` flag is set, borrowed otherwise.

use std::alloc::{self, Layout};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

// ─────────────────────────────────────────────────────────────────────────────
// Field access
// ─────────────────────────────────────────────────────────────────────────────

/// Reads a scalar field at `base + offset`.
///
/// # Safety
/// `base + offset` must be valid for reads of `size_of::<T>()` bytes and
/// contain an initialized `T`.  Reads are unaligned-tolerant.
#[inline(always)]
pub unsafe fn read_field<T: Copy>(base: *const u8, offset: u32) -> T {
    ptr::read_unaligned(base.add(offset as usize) as *const T)
}

/// Writes a scalar field at `base + offset`.
///
/// # Safety
/// `base + offset` must be valid for writes of `size_of::<T>()` bytes.
#[inline(always)]
pub unsafe fn write_field<T>(base: *mut u8, offset: u32, v: T) {
    ptr::write_unaligned(base.add(offset as usize) as *mut T, v);
}

/// Const pointer to the field at `base + offset`.
///
/// # Safety
/// The offset must lie inside the sample described by the descriptor.
#[inline(always)]
pub unsafe fn field_ptr(base: *const u8, offset: u32) -> *const u8 {
    base.add(offset as usize)
}

/// Mutable pointer to the field at `base + offset`.
///
/// # Safety
/// The offset must lie inside the sample described by the descriptor.
#[inline(always)]
pub unsafe fn field_mut(base: *mut u8, offset: u32) -> *mut u8 {
    base.add(offset as usize)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sequences
// ─────────────────────────────────────────────────────────────────────────────

/// Buffer alignment for sequence allocations: the strictest element
/// alignment any descriptor can demand.
pub const SEQ_BUFFER_ALIGN: usize = 8;

/// Inline header of a dynamic sequence field.  Field order and layout are
/// part of the sample ABI.
#[repr(C)]
#[derive(Debug)]
pub struct Sequence {
    /// Allocated capacity in elements.
    pub maximum: u32,
    /// Number of valid elements.
    pub length: u32,
    /// Element storage; null when `maximum == 0`.
    pub buffer: *mut u8,
    /// True when the sample owns `buffer` and the reader may reallocate it.
    pub release: bool,
}

impl Sequence {
    /// An empty sequence owning no buffer.
    pub const fn empty() -> Sequence {
        Sequence {
            maximum: 0,
            length: 0,
            buffer: ptr::null_mut(),
            release: false,
        }
    }
}

#[inline]
unsafe fn seq_layout(bytes: usize) -> Layout {
    Layout::from_size_align_unchecked(bytes, SEQ_BUFFER_ALIGN)
}

/// Grows a sequence's buffer so it can hold `num` elements of `elem_size`
/// bytes, when the sequence owns its buffer (or owns nothing yet).  A
/// caller-provided buffer (`release == false`, `maximum > 0`) is left
/// untouched; the reader then truncates to `maximum`.
///
/// When `init` is set, newly exposed bytes are zeroed so that complex or
/// pointer-valued elements start from a safe state.
///
/// # Safety
/// `seq` must point at a valid [`Sequence`] whose `buffer`/`maximum` agree
/// with its actual allocation.
pub unsafe fn grow_sequence(seq: *mut Sequence, num: u32, elem_size: u32, init: bool) {
    let s = &mut *seq;
    let size = num as usize * elem_size as usize;

    // The caller may not have kept maximum up to date.
    if s.length > s.maximum {
        s.maximum = s.length;
    }

    if num > 0 && s.maximum == 0 {
        let p = if init {
            alloc::alloc_zeroed(seq_layout(size))
        } else {
            alloc::alloc(seq_layout(size))
        };
        assert!(!p.is_null(), "sequence buffer allocation failed");
        s.buffer = p;
        s.release = true;
        s.maximum = num;
    } else if num > s.maximum && s.release {
        let old_bytes = s.maximum as usize * elem_size as usize;
        let p = alloc::realloc(s.buffer, seq_layout(old_bytes), size);
        assert!(!p.is_null(), "sequence buffer allocation failed");
        if init {
            ptr::write_bytes(p.add(old_bytes), 0, size - old_bytes);
        }
        s.buffer = p;
        s.maximum = num;
    }
}

/// Releases a sequence's buffer if owned and resets the header to empty.
/// Element contents (strings, nested buffers) must already be freed.
///
/// # Safety
/// Same contract as [`grow_sequence`]; `elem_size` must match the element
/// size the buffer was allocated with.
pub unsafe fn free_sequence_buffer(seq: *mut Sequence, elem_size: u32) {
    let s = &mut *seq;
    if s.release && !s.buffer.is_null() {
        let bytes = s.maximum as usize * elem_size as usize;
        if bytes > 0 {
            alloc::dealloc(s.buffer, seq_layout(bytes));
        }
    }
    *s = Sequence::empty();
}

// ─────────────────────────────────────────────────────────────────────────────
// Strings
// ─────────────────────────────────────────────────────────────────────────────

/// Borrows the bytes (without NUL) of a sample string pointer; `None` for a
/// null pointer.
///
/// # Safety
/// A non-null `p` must point at a NUL-terminated allocation.
#[inline]
pub unsafe fn string_bytes<'a>(p: *const c_char) -> Option<&'a [u8]> {
    if p.is_null() {
        None
    } else {
        Some(CStr::from_ptr(p).to_bytes())
    }
}

/// Frees an owned sample string (no-op for null).
///
/// # Safety
/// `p` must be null or a pointer previously produced by
/// [`CString::into_raw`] with no interior NUL bytes.
#[inline]
pub unsafe fn free_string(p: *mut c_char) {
    if !p.is_null() {
        drop(CString::from_raw(p));
    }
}

/// Replaces the string in `slot` with a fresh allocation holding
/// `bytes_with_nul` (which must end in NUL and contain no interior NUL —
/// normalization guarantees both for wire data).
///
/// # Safety
/// `slot` must be a valid string field of a sample; its current value must
/// satisfy the [`free_string`] contract.
pub unsafe fn replace_string(slot: *mut *mut c_char, bytes_with_nul: &[u8]) {
    debug_assert!(matches!(bytes_with_nul.last(), Some(0)));
    free_string(*slot);
    let c = CString::from_vec_with_nul_unchecked(bytes_with_nul.to_vec());
    *slot = c.into_raw();
}
