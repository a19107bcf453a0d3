use tracing::trace;

use crate::bitbuf::BitBuffer;
use crate::bitstream::BitStream;
use crate::descriptor::IntConstraint;
use crate::result::{Error, ErrorKind, Result};

#[inline]
pub(crate) fn bit_len64(v: u64) -> usize {
    (64 - v.leading_zeros()) as usize
}

/// Octets of the minimal unsigned big-endian form, at least one.
#[inline]
pub(crate) fn octet_len_u64(v: u64) -> usize {
    bit_len64(v).div_ceil(8).max(1)
}

/// Octets of the minimal two's-complement form, at least one.
#[inline]
pub(crate) fn octet_len_i64(v: i64) -> usize {
    let magnitude = if v < 0 { !(v as u64) } else { v as u64 };
    (bit_len64(magnitude) + 1).div_ceil(8)
}

/// Duplicate bit `bits - 1` of `v` into every higher bit.
#[inline]
pub(crate) fn sign_extend(v: u64, bits: usize) -> i64 {
    if bits == 0 || bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

/// Raw-bit comparison helper; the field type decides the reading of bounds.
pub(crate) fn in_range(n: i64, min: Option<i64>, max: Option<i64>, is_signed: bool) -> bool {
    if is_signed {
        min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)
    } else {
        let u = n as u64;
        min.map_or(true, |m| u >= m as u64) && max.map_or(true, |m| u <= m as u64)
    }
}

/// Fully constrained whole number over a span < 2^16 (the one-octet,
/// bit-field and two-octet cases of X.691 §11.5.7).
pub(crate) fn write_constrained_u16(bb: &mut BitBuffer, v: u16, bit_len: usize, span: u64) {
    bb.push_mark();
    if bit_len == 0 {
        // span is zero, the value is implied
    } else if bit_len == 8 && span == 255 {
        bb.put_aligned_u8(v as u8);
    } else if bit_len <= 8 {
        bb.put(v as u64, bit_len);
    } else {
        debug_assert!(bit_len <= 16);
        bb.put_aligned_u16(v);
    }
    bb.trace_tail("constrained number");
    bb.pop_mark();
}

pub(crate) fn read_constrained_u16(bs: &mut BitStream<'_>, bit_len: usize, span: u64) -> Result<u16> {
    debug_assert!(bit_len > 0);
    if bit_len == 8 && span == 255 {
        return read_aligned_uint(bs, 1).map(|v| v as u16);
    }
    if bit_len <= 8 {
        return Ok(bs.get(bit_len)? as u16);
    }
    read_aligned_uint(bs, 2).map(|v| v as u16)
}

pub(crate) fn read_aligned_uint(bs: &mut BitStream<'_>, octets: usize) -> Result<u64> {
    debug_assert!(octets <= 8);
    bs.align()?;
    bs.get(octets * 8)
}

/// Unconstrained length determinant below the fragmentation threshold.
/// Returns true when `len >= 16K` and the caller has to fragment instead;
/// the buffer is then left aligned with nothing else written.
pub(crate) fn write_ulen(bb: &mut BitBuffer, len: usize) -> bool {
    bb.push_mark();
    bb.align();
    bb.trace_tail("align");
    bb.reset_mark();

    if len <= 127 {
        bb.put_aligned_u8(len as u8);
        bb.trace_tail("unconstrained length");
        bb.pop_mark();
        return false;
    }
    if len < crate::length::FRAG_16K {
        bb.put_aligned_u16(len as u16 | 0x8000);
        bb.trace_tail("unconstrained length");
        bb.pop_mark();
        return false;
    }
    bb.pop_mark();
    true
}

pub(crate) enum Ulen {
    Len(usize),
    /// First octet is a `11mmmmmm` fragment header, left unconsumed.
    Fragmented,
}

pub(crate) fn read_ulen(bs: &mut BitStream<'_>) -> Result<Ulen> {
    bs.align()?;
    let first = bs.peek(8)?;
    if first & 0x80 == 0 {
        bs.skip(8)?;
        return Ok(Ulen::Len(first as usize));
    }
    if first & 0x40 != 0 {
        return Ok(Ulen::Fragmented);
    }
    let v = bs.get(16)?;
    Ok(Ulen::Len((v & 0x7fff) as usize))
}

/// Unconstrained length where fragmentation is not acceptable (number
/// octet counts, remainder lengths).
pub(crate) fn read_ulen_plain(bs: &mut BitStream<'_>) -> Result<usize> {
    match read_ulen(bs)? {
        Ulen::Len(len) => Ok(len),
        Ulen::Fragmented => Err(Error::new(ErrorKind::LengthLimitExceeded, bs.pos())),
    }
}

/// Two's-complement unconstrained whole number. Unsigned values with the
/// top bit set take the 9-octet form with a leading zero octet.
pub(crate) fn write_2c(bb: &mut BitBuffer, v: i64, is_signed: bool) {
    if !is_signed && v < 0 {
        write_ulen(bb, 9);
        bb.align();
        bb.put(0, 8);
        bb.put_aligned_uint(v as u64, 8);
        return;
    }
    let olen = octet_len_i64(v);
    write_ulen(bb, olen);
    bb.put_aligned_uint(v as u64, olen);
}

pub(crate) fn read_2c(bs: &mut BitStream<'_>, is_signed: bool) -> Result<i64> {
    let olen = read_ulen_plain(bs)?;
    if olen == 9 && !is_signed {
        let lead = read_aligned_uint(bs, 1)?;
        if lead != 0 {
            return Err(Error::new(ErrorKind::LengthLimitExceeded, bs.pos()));
        }
        return Ok(read_aligned_uint(bs, 8)? as i64);
    }
    if olen > 8 {
        return Err(Error::new(ErrorKind::LengthLimitExceeded, bs.pos()));
    }
    let raw = read_aligned_uint(bs, olen)?;
    let v = sign_extend(raw, olen * 8);
    if !is_signed && v < 0 {
        return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
    }
    Ok(v)
}

/// Constrained or semi-constrained non-negative number, already offset from
/// its lower bound.
pub(crate) fn write_number(bb: &mut BitBuffer, v: u64, info: Option<&IntConstraint>) {
    if let Some(info) = info.filter(|i| i.is_fully_constrained()) {
        if info.span_bit_len <= 16 {
            write_constrained_u16(bb, v as u16, info.span_bit_len, info.span);
            return;
        }
        let olen = octet_len_u64(v);
        write_constrained_u16(bb, (olen - 1) as u16, info.span_octet_bit_len, info.span);
        bb.put_aligned_uint(v, olen);
        return;
    }
    let olen = octet_len_u64(v);
    let fragmented = write_ulen(bb, olen);
    debug_assert!(!fragmented);
    bb.put_aligned_uint(v, olen);
}

pub(crate) fn read_number(bs: &mut BitStream<'_>, info: Option<&IntConstraint>) -> Result<u64> {
    let olen;
    if let Some(info) = info.filter(|i| i.is_fully_constrained()) {
        if info.span_bit_len <= 16 {
            if info.span_bit_len == 0 {
                return Ok(0);
            }
            return read_constrained_u16(bs, info.span_bit_len, info.span).map(u64::from);
        }
        olen = read_constrained_u16(bs, info.span_octet_bit_len, info.span)? as usize + 1;
    } else {
        olen = read_ulen_plain(bs)?;
        if olen == 0 {
            return Err(Error::new(ErrorKind::LengthLimitExceeded, bs.pos()));
        }
    }
    if olen > 8 {
        return Err(Error::new(ErrorKind::LengthLimitExceeded, bs.pos()));
    }
    read_aligned_uint(bs, olen)
}

/// Normally small non-negative whole number (X.691 §10.6): 6 bits when
/// `n <= 63`, the semi-constrained form behind a marker bit otherwise.
pub(crate) fn write_nsnnwn(bb: &mut BitBuffer, n: usize) {
    if n <= 63 {
        bb.put(n as u64, 7);
        return;
    }
    bb.put_bit(true);
    write_number(bb, n as u64, None);
}

pub(crate) fn read_nsnnwn(bs: &mut BitStream<'_>) -> Result<usize> {
    if !bs.get_bit()? {
        return Ok(bs.get(6)? as usize);
    }
    let n = read_number(bs, None)?;
    usize::try_from(n).map_err(|_| Error::new(ErrorKind::LengthLimitExceeded, bs.pos()))
}

/// Whole-number front end: extension bit, then the root form picked by the
/// constraint. `n` is the raw 64-bit pattern of the value.
pub(crate) fn encode_number(bb: &mut BitBuffer, n: i64, info: &IntConstraint, is_signed: bool) -> Result<()> {
    if !in_range(n, info.min, info.max, is_signed) {
        if !info.extended || !in_range(n, info.ext_min, info.ext_max, is_signed) {
            return Err(Error::new(ErrorKind::ConstraintViolation, bb.len_bits()));
        }
        // extension constraints are not PER-visible
        bb.put_bit(true);
        write_2c(bb, n, is_signed);
        return Ok(());
    }
    if info.extended {
        bb.put_bit(false);
    }
    match info.min {
        Some(min) => write_number(bb, (n as u64).wrapping_sub(min as u64), Some(info)),
        None => write_2c(bb, n, is_signed),
    }
    Ok(())
}

pub(crate) fn decode_number(bs: &mut BitStream<'_>, info: &IntConstraint, is_signed: bool) -> Result<i64> {
    if info.extended && bs.get_bit()? {
        let n = read_2c(bs, is_signed)?;
        if !in_range(n, info.ext_min, info.ext_max, is_signed) {
            return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
        }
        trace!("decoded extended number (n = {n})");
        return Ok(n);
    }

    let res = match info.min {
        Some(min) => {
            let d = read_number(bs, Some(info))?;
            let sum = if is_signed {
                min.checked_add_unsigned(d)
            } else {
                (min as u64).checked_add(d).map(|v| v as i64)
            };
            sum.ok_or_else(|| Error::new(ErrorKind::ConstraintViolation, bs.pos()))?
        }
        None => read_2c(bs, is_signed)?,
    };
    if !in_range(res, info.min, info.max, is_signed) {
        return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
    }
    Ok(res)
}
