//! Length determinants for repeated data (octet strings, bit strings,
//! character strings, SEQUENCE-OF counts), including the fragmentation
//! scheme of X.691 §11.9.3.8.
//!
//! A fragmented value is written as 64K-item blocks while 64K or more items
//! remain, then one 16K/32K/48K block when possible, then a remainder below
//! 16K encoded as a plain unconstrained length:
//!
//! `| 11000100 | 64K items | 11000001 | 16K items | 00000011 | 3 items |`
//!
//! When the total is an exact multiple of 16K the remainder is written as a
//! zero length, which terminates the fragment run.

use tracing::trace;

use crate::bitbuf::BitBuffer;
use crate::bitstream::BitStream;
use crate::descriptor::{CountConstraint, SIZE_UNBOUNDED};
use crate::number::{bit_len64, read_constrained_u16, read_ulen, read_ulen_plain, write_constrained_u16, write_ulen, Ulen};
use crate::result::{Error, ErrorKind, Result};

pub(crate) const FRAG_16K: usize = 16 << 10;
pub(crate) const FRAG_64K: usize = 64 << 10;

/// Length determinant below the fragmentation threshold. Constrained ranges
/// narrower than 2^16 use the constrained-integer form; everything else
/// falls back to the unconstrained form (X.691 §11.9.4.2). Returns true
/// when the caller has to fragment.
pub(crate) fn write_len(bb: &mut BitBuffer, len: usize, min: usize, max: usize) -> bool {
    if max != SIZE_UNBOUNDED {
        debug_assert!(len <= max);
        let span = (max - min) as u64;
        if span < 1 << 16 {
            write_constrained_u16(bb, (len - min) as u16, bit_len64(span), span);
            return false;
        }
    }
    write_ulen(bb, len)
}

pub(crate) fn read_len(bs: &mut BitStream<'_>, min: usize, max: usize) -> Result<Ulen> {
    if max != SIZE_UNBOUNDED {
        let span = (max - min) as u64;
        if span < 1 << 16 {
            if span == 0 {
                return Ok(Ulen::Len(min));
            }
            let d = read_constrained_u16(bs, bit_len64(span), span)?;
            return Ok(Ulen::Len(min + d as usize));
        }
    }
    read_ulen(bs)
}

/// Encoding state for one repeated value. `begin` checks the size
/// constraints and writes the extension bit; each `next` call writes one
/// length determinant and returns how many items to emit after it.
#[derive(Debug)]
pub(crate) struct LenEncoder {
    len: usize,
    remains: usize,
    to_encode: usize,
    min_root: usize,
    max_root: usize,
    extension: bool,
    fragmented: bool,
    done: bool,
}

impl LenEncoder {
    pub fn begin(bb: &mut BitBuffer, len: usize, info: Option<&CountConstraint>) -> Result<Self> {
        let mut enc = LenEncoder {
            len,
            remains: len,
            to_encode: 0,
            min_root: 0,
            max_root: SIZE_UNBOUNDED,
            extension: false,
            fragmented: false,
            done: false,
        };
        if let Some(info) = info {
            if len < info.min || len > info.max {
                if !info.extended || len < info.ext_min || len > info.ext_max {
                    return Err(Error::new(ErrorKind::ConstraintViolation, bb.len_bits()));
                }
                enc.extension = true;
                bb.put_bit(true);
            } else {
                if info.extended {
                    bb.put_bit(false);
                }
                enc.min_root = info.min;
                enc.max_root = info.max;
            }
        }
        Ok(enc)
    }

    pub fn next(&mut self, bb: &mut BitBuffer) -> usize {
        if !self.fragmented {
            // An extended length is always unconstrained, whatever the root
            // bounds say.
            self.fragmented = if self.extension {
                write_ulen(bb, self.len)
            } else {
                write_len(bb, self.len, self.min_root, self.max_root)
            };
            if !self.fragmented {
                self.done = true;
                self.to_encode = self.len;
            }
        }
        if self.fragmented {
            if self.remains < FRAG_16K {
                let again = write_ulen(bb, self.remains);
                debug_assert!(!again);
                self.to_encode = self.remains;
                self.done = true;
            } else {
                let blocks = self.remains.min(FRAG_64K) / FRAG_16K;
                self.to_encode = blocks * FRAG_16K;
                bb.align();
                bb.put(0xc0 | blocks as u64, 8);
                trace!("wrote fragment header ({blocks} x 16K)");
            }
        }
        self.remains -= self.to_encode;
        self.to_encode
    }

    pub fn done(&self) -> bool {
        self.done
    }
}

/// Decoding counterpart of `LenEncoder`. The maximum bound is enforced as
/// fragments accumulate, the minimum once the last fragment is in.
#[derive(Debug)]
pub(crate) struct LenDecoder {
    min_len: usize,
    max_len: usize,
    cumulated: usize,
    to_decode: usize,
    extension: bool,
    more_fragments: bool,
    started: bool,
}

impl LenDecoder {
    pub fn begin(bs: &mut BitStream<'_>, info: Option<&CountConstraint>) -> Result<Self> {
        let mut dec = LenDecoder {
            min_len: 0,
            max_len: SIZE_UNBOUNDED,
            cumulated: 0,
            to_decode: 0,
            extension: false,
            more_fragments: false,
            started: false,
        };
        if let Some(info) = info {
            if info.extended {
                dec.extension = bs.get_bit()?;
            }
            if dec.extension {
                dec.min_len = info.ext_min;
                dec.max_len = info.ext_max;
            } else {
                dec.min_len = info.min;
                dec.max_len = info.max;
            }
        }
        Ok(dec)
    }

    pub fn next(&mut self, bs: &mut BitStream<'_>) -> Result<usize> {
        if self.more_fragments {
            return self.read_fragment(bs);
        }
        debug_assert!(!self.started);
        self.started = true;
        let ulen = if self.extension {
            read_ulen(bs)?
        } else {
            read_len(bs, self.min_len, self.max_len)?
        };
        match ulen {
            Ulen::Fragmented => {
                self.more_fragments = true;
                self.read_fragment(bs)
            }
            Ulen::Len(len) => {
                self.cumulated = len;
                self.to_decode = len;
                self.check_max(bs)?;
                self.check_min(bs)?;
                Ok(len)
            }
        }
    }

    fn read_fragment(&mut self, bs: &mut BitStream<'_>) -> Result<usize> {
        bs.align()?;
        let first = bs.peek(8)?;
        let len;
        if first & 0xc0 == 0xc0 {
            // Every block fragment but the last must carry 64K items.
            if self.to_decode != 0 && self.to_decode != FRAG_64K {
                return Err(Error::new(
                    ErrorKind::FragmentationInvalid("block fragment after a short block"),
                    bs.pos(),
                ));
            }
            let blocks = (first & 0x3f) as usize;
            if blocks == 0 {
                return Err(Error::new(ErrorKind::FragmentationInvalid("empty block fragment"), bs.pos()));
            }
            if blocks > 4 {
                return Err(Error::new(
                    ErrorKind::FragmentationInvalid("block fragment beyond 64K"),
                    bs.pos(),
                ));
            }
            len = blocks * FRAG_16K;
            bs.skip(8)?;
            trace!("read fragment header ({blocks} x 16K)");
        } else {
            len = read_ulen_plain(bs)?;
            self.more_fragments = false;
        }
        self.cumulated = self
            .cumulated
            .checked_add(len)
            .ok_or_else(|| Error::new(ErrorKind::LengthLimitExceeded, bs.pos()))?;
        self.check_max(bs)?;
        if !self.more_fragments {
            self.check_min(bs)?;
        }
        self.to_decode = len;
        Ok(len)
    }

    fn check_max(&self, bs: &BitStream<'_>) -> Result<()> {
        if self.cumulated > self.max_len {
            return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
        }
        Ok(())
    }

    fn check_min(&self, bs: &BitStream<'_>) -> Result<()> {
        if self.cumulated < self.min_len {
            return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
        }
        Ok(())
    }

    /// Total item count across every determinant read so far.
    pub fn cumulated(&self) -> usize {
        self.cumulated
    }

    pub fn more(&self) -> bool {
        self.more_fragments
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_len(len: usize, info: Option<&CountConstraint>) -> (Vec<u8>, Vec<usize>) {
        let mut bb = BitBuffer::new();
        let mut enc = LenEncoder::begin(&mut bb, len, info).unwrap();
        let mut chunks = vec![];
        loop {
            chunks.push(enc.next(&mut bb));
            if enc.done() {
                break;
            }
        }
        (bb.into_bytes(), chunks)
    }

    #[test]
    fn short_unconstrained_lengths() {
        assert_eq!(encode_len(0, None).0, vec![0x00]);
        assert_eq!(encode_len(127, None).0, vec![0x7f]);
        assert_eq!(encode_len(128, None).0, vec![0x80, 0x80]);
        assert_eq!(encode_len(16383, None).0, vec![0xbf, 0xff]);
    }

    #[test]
    fn fragment_chunking() {
        let (bytes, chunks) = encode_len(FRAG_64K + FRAG_16K * 2 + 3, None);
        assert_eq!(chunks, vec![FRAG_64K, FRAG_16K * 2, 3]);
        assert_eq!(bytes, vec![0xc4, 0xc2, 0x03]);
    }

    #[test]
    fn multiple_of_16k_ends_with_zero_remainder() {
        let (bytes, chunks) = encode_len(FRAG_16K, None);
        assert_eq!(chunks, vec![FRAG_16K, 0]);
        assert_eq!(bytes, vec![0xc1, 0x00]);
    }

    #[test]
    fn decode_rejects_bad_fragment_headers() {
        for (data, what) in [
            (&[0xc0u8][..], "empty block"),
            (&[0xc5][..], "beyond 64K"),
            (&[0xc1, 0xc1][..], "block after short block"),
        ] {
            let mut bs = BitStream::new(data);
            let mut dec = LenDecoder::begin(&mut bs, None).unwrap();
            let mut res = dec.next(&mut bs);
            while res.is_ok() && dec.more() {
                res = dec.next(&mut bs);
            }
            assert!(res.is_err(), "{what} accepted");
        }
    }

    #[test]
    fn decode_tracks_cumulated_length() {
        let data = [0xc4, 0xc2, 0x03];
        let mut bs = BitStream::new(&data);
        let mut dec = LenDecoder::begin(&mut bs, None).unwrap();
        let mut total = 0;
        loop {
            total += dec.next(&mut bs).unwrap();
            if !dec.more() {
                break;
            }
        }
        assert_eq!(total, FRAG_64K + FRAG_16K * 2 + 3);
        assert_eq!(dec.cumulated(), total);
    }
}
