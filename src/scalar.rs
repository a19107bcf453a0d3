use tracing::trace;

use crate::bitbuf::BitBuffer;
use crate::bitstream::BitStream;
use crate::descriptor::{CountConstraint, EnumInfo};
use crate::length::{LenDecoder, LenEncoder};
use crate::mem::{alloc_or_fail, realloc_or_fail, Arena};
use crate::number::{decode_number, read_nsnnwn, write_number, write_nsnnwn};
use crate::result::{Error, ErrorKind, Result};
use crate::value::BitString;

pub(crate) fn encode_bool(bb: &mut BitBuffer, b: bool) {
    bb.put_bit(b);
}

pub(crate) fn decode_bool(bs: &mut BitStream<'_>) -> Result<bool> {
    bs.get_bit()
}

pub(crate) fn encode_enum(bb: &mut BitBuffer, val: i32, info: &EnumInfo) -> Result<()> {
    bb.push_mark();
    let (pos, extended_val) = info
        .find(val)
        .ok_or_else(|| Error::new(ErrorKind::EnumValueUnknown(val), bb.len_bits()))?;

    if extended_val {
        bb.put_bit(true);
        write_nsnnwn(bb, pos);
    } else {
        if info.extended {
            bb.put_bit(false);
        }
        write_number(bb, pos as u64, Some(&info.constraints));
    }
    bb.trace_tail("enum value");
    bb.pop_mark();
    Ok(())
}

pub(crate) fn decode_enum(bs: &mut BitStream<'_>, info: &EnumInfo) -> Result<i32> {
    if info.extended && bs.get_bit()? {
        let pos = read_nsnnwn(bs)?;
        return match info.ext_values.get(pos) {
            Some(&val) => Ok(val),
            None => match info.ext_default {
                Some(val) => {
                    trace!("unknown extended enum value, using the default");
                    Ok(val)
                }
                None => Err(Error::new(ErrorKind::EnumValueUnknownNoDefault(pos), bs.pos())),
            },
        };
    }

    let pos = decode_number(bs, &info.constraints, true)?;
    info.root_values
        .get(pos as usize)
        .copied()
        .ok_or_else(|| Error::new(ErrorKind::ConstraintViolation, bs.pos()))
}

/// Fixed-size strings of one or two octets are packed without realignment,
/// provided the length actually is the root size.
fn octets_use_short_form(info: Option<&CountConstraint>, len: usize) -> bool {
    matches!(info, Some(c) if c.max <= 2 && c.min == c.max && len == c.max)
}

pub(crate) fn encode_octet_string(bb: &mut BitBuffer, bytes: &[u8], info: Option<&CountConstraint>) -> Result<()> {
    let mut enc = LenEncoder::begin(bb, bytes.len(), info)?;
    let align_before_data = !octets_use_short_form(info, bytes.len());

    let mut offset = 0;
    loop {
        let n = enc.next(bb);
        if align_before_data {
            bb.align();
        }
        bb.put_bytes(&bytes[offset..offset + n]);
        offset += n;
        if enc.done() {
            break;
        }
    }
    Ok(())
}

pub(crate) fn decode_octet_string(
    bs: &mut BitStream<'_>,
    info: Option<&CountConstraint>,
    arena: &mut dyn Arena,
) -> Result<Vec<u8>> {
    let mut dec = LenDecoder::begin(bs, info)?;
    let mut buf: Option<Vec<u8>> = None;

    loop {
        let n = dec.next(bs)?;
        let first = buf.is_none();
        if !(first && octets_use_short_form(info, n)) {
            // Tolerated at end of input when nothing is left to read.
            let _ = bs.align();
        }
        let mut out = match buf.take() {
            None => alloc_or_fail(arena, n, bs.pos())?,
            Some(prev) => {
                let old = prev.len();
                let grown = realloc_or_fail(arena, prev, old + n, bs.pos())?;
                debug_assert!(grown.len() == old + n);
                grown
            }
        };
        let start = out.len() - n;
        bs.read_bytes(&mut out[start..])?;
        buf = Some(out);
        if !dec.more() {
            break;
        }
    }
    let out = buf.unwrap_or_default();
    trace!("decoded octet string ({} octets)", out.len());
    Ok(out)
}

/// A bit string dodges realignment only when its size is fixed, at most 16,
/// and the encoded length falls in the root. Empty strings never realign.
fn bstring_needs_align(info: Option<&CountConstraint>, len: usize) -> bool {
    if len == 0 {
        return false;
    }
    match info {
        Some(c) if c.max <= 16 && c.min == c.max => len != c.min,
        _ => true,
    }
}

pub(crate) fn encode_bit_string(bb: &mut BitBuffer, bits: &BitString, info: Option<&CountConstraint>) -> Result<()> {
    let len = bits.bit_len();
    let mut enc = LenEncoder::begin(bb, len, info)?;

    let mut offset = 0;
    loop {
        let n = enc.next(bb);
        if bstring_needs_align(info, len) {
            bb.align();
        }
        bb.put_bit_stream(BitStream::with_range(bits.data(), offset, offset + n));
        offset += n;
        if enc.done() {
            break;
        }
    }
    debug_assert!(offset == len);
    Ok(())
}

pub(crate) fn decode_bit_string(
    bs: &mut BitStream<'_>,
    info: Option<&CountConstraint>,
    arena: &mut dyn Arena,
) -> Result<BitString> {
    let mut dec = LenDecoder::begin(bs, info)?;
    let mut reassembly = BitBuffer::new();

    loop {
        let n = dec.next(bs)?;
        if bstring_needs_align(info, n) {
            bs.align()?;
        }
        let fragment = bs.take_bits(n)?;
        reassembly.put_bit_stream(fragment);
        if !dec.more() {
            break;
        }
    }

    let bit_len = reassembly.len_bits();
    let mut data = alloc_or_fail(arena, bit_len.div_ceil(8), bs.pos())?;
    data.copy_from_slice(&reassembly.into_bytes());
    trace!("decoded bit string ({bit_len} bits)");
    Ok(BitString::new(data, bit_len))
}
