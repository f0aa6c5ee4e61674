//! DDS CDR serialization core.
//!
//! Three tightly coupled subsystems bridge user-defined topic types and the
//! on-the-wire CDR byte stream:
//!
//! - a **bytecode-driven codec**: a compact per-topic instruction stream
//!   ([`ops`]) interpreted by a family of walkers ([`walker`]) that
//!   serialize, deserialize, validate/normalize, extract keys, and
//!   pretty-print arbitrary user structures;
//! - **keyhash derivation** ([`keyhash`]): the 16-byte per-instance
//!   identifier, either the literal big-endian key CDR or its MD5 digest;
//! - the **instance map** ([`tkmap`]): a concurrent hopscotch table that
//!   assigns each distinct key a stable 64-bit instance id with
//!   reference-counted lifetime and epoch-deferred reclamation.

pub mod cdr;
pub mod hash;
pub mod iid;
pub mod keyhash;
pub mod ops;
pub mod sample;
pub mod serdata;
pub mod tkmap;
pub mod topic;
pub mod walker;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the primary entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Topic registration handle; owns the type descriptor and cached
/// per-type serialization facts.
pub use topic::Topic;

/// Immutable topic metadata: layout, flags, instruction stream, key list.
pub use ops::{DescriptorFlags, KeyDescriptor, TypeDescriptor};

/// An encapsulated, validated serialized sample.
pub use serdata::{serdata_cmp, SampleKind, SerData};

/// Why a wire payload was rejected by validation.
pub use walker::NormalizeError;

/// The 16-byte per-instance identifier and its derivation.
pub use keyhash::{keyhash_from_sample, KeyHash};

/// The concurrent keyhash → instance map and its entries.
pub use tkmap::{Instance, InstanceMap};

/// Process-unique 64-bit instance id allocation.
pub use iid::{IidGenerator, IID_NIL};
