//! Aligned PER (ITU-T X.691) packer and unpacker driven by run-time
//! descriptors: given a [`descriptor::Descriptor`] enumerating a constructed
//! type's fields, constraints and extensions, [`pack`] produces the
//! constraint-aware bit stream and [`unpack`] parses it back into a
//! [`value::Value`] tree.

use tracing::debug;

use crate::bitbuf::BitBuffer;
use crate::bitstream::BitStream;
use crate::descriptor::Descriptor;
use crate::mem::Arena;
use crate::result::Result;
use crate::value::Value;

pub mod bitbuf;
pub mod bitstream;
pub mod builders;
pub mod descriptor;
mod driver;
mod length;
pub mod mem;
mod number;
mod registry;
pub mod result;
mod scalar;
pub mod value;

pub use registry::{get_descriptor, register_descriptor};

/// Encode `value` under `desc`. The result is never empty: a zero-bit
/// encoding comes back as a single zero octet, and trailing bits of the
/// last octet are zero. Nothing is returned on failure; the codec does not
/// produce partial output.
pub fn pack(desc: &Descriptor, value: &Value) -> Result<Vec<u8>> {
    debug!("packing {}", desc.name());
    let mut bb = BitBuffer::new();
    driver::encode_constructed(&mut bb, value, desc, None).map_err(|e| e.in_field(desc.name()))?;
    let mut out = bb.into_bytes();
    if out.is_empty() {
        // X.691 §10.1.3
        out.push(0);
    }
    debug!("packed {} ({} octets)", desc.name(), out.len());
    Ok(out)
}

/// Upper bound, in bits, on the size of `pack(desc, value)`.
pub fn pack_size(desc: &Descriptor, value: &Value) -> Result<usize> {
    driver::size_constructed(value, desc, None)
        .map(|bits| bits.max(8))
        .map_err(|e| e.in_field(desc.name()))
}

/// Decode an APER octet string under `desc`. Variable-length payloads are
/// allocated through `arena`; the codec never frees them. On failure the
/// stream may have been partially consumed and any partial output is
/// dropped.
pub fn unpack(desc: &Descriptor, octets: &[u8], arena: &mut dyn Arena) -> Result<Value> {
    debug!("unpacking {} ({} octets)", desc.name(), octets.len());
    let mut bs = BitStream::new(octets);
    driver::decode_constructed(&mut bs, desc, None, arena).map_err(|e| e.in_field(desc.name()))
}
