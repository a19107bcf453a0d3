use crate::result::{Error, ErrorKind, Result};

/// Borrowed bit-level view over an octet range. `start` and `end` are
/// absolute bit offsets into `bytes`; consuming advances `start`, slicing a
/// sub-stream narrows `end`. All failing reads leave the position untouched.
#[derive(Debug, Clone, Copy)]
pub struct BitStream<'a> {
    bytes: &'a [u8],
    start: usize,
    end: usize,
}

impl<'a> BitStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BitStream {
            bytes,
            start: 0,
            end: bytes.len() * 8,
        }
    }

    pub(crate) fn with_range(bytes: &'a [u8], start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= bytes.len() * 8);
        BitStream { bytes, start, end }
    }

    /// Absolute bit offset of the read position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn has(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.start & 7 == 0
    }

    fn eof(&self) -> Error {
        Error::new(ErrorKind::UnexpectedEof, self.start)
    }

    /// Next `count` bits MSB-first without advancing, `count <= 64`.
    pub fn peek(&self, count: usize) -> Result<u64> {
        debug_assert!(count <= 64);
        if !self.has(count) {
            return Err(self.eof());
        }
        let mut acc = 0u64;
        let mut pos = self.start;
        let mut rem = count;
        while rem > 0 {
            let off = pos & 7;
            let room = 8 - off;
            let take = room.min(rem);
            let chunk = (u32::from(self.bytes[pos >> 3]) >> (room - take)) & ((1u32 << take) - 1);
            acc = (acc << take) | u64::from(chunk);
            pos += take;
            rem -= take;
        }
        Ok(acc)
    }

    pub fn get(&mut self, count: usize) -> Result<u64> {
        let v = self.peek(count)?;
        self.start += count;
        Ok(v)
    }

    pub fn get_bit(&mut self) -> Result<bool> {
        Ok(self.get(1)? != 0)
    }

    /// Unchecked read; the caller has already tested capacity.
    pub fn take(&mut self, count: usize) -> u64 {
        debug_assert!(self.has(count));
        match self.peek(count) {
            Ok(v) => {
                self.start += count;
                v
            }
            Err(_) => 0,
        }
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        if !self.has(count) {
            return Err(self.eof());
        }
        self.start += count;
        Ok(())
    }

    /// Advance to the next octet boundary; the padding must be available.
    pub fn align(&mut self) -> Result<()> {
        let pad = (8 - (self.start & 7)) & 7;
        if !self.has(pad) {
            return Err(Error::new(ErrorKind::AlignmentFailed, self.start));
        }
        self.start += pad;
        Ok(())
    }

    /// Split off the next `count` bits as an independent sub-stream.
    pub fn take_bits(&mut self, count: usize) -> Result<BitStream<'a>> {
        if !self.has(count) {
            return Err(self.eof());
        }
        let sub = BitStream::with_range(self.bytes, self.start, self.start + count);
        self.start += count;
        Ok(sub)
    }

    /// Fill `out` with the next `out.len()` octets, byte-shifting when the
    /// stream is not octet-aligned.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        if !self.has(out.len() * 8) {
            return Err(self.eof());
        }
        if self.is_aligned() {
            let from = self.start >> 3;
            out.copy_from_slice(&self.bytes[from..from + out.len()]);
            self.start += out.len() * 8;
        } else {
            for slot in out.iter_mut() {
                *slot = self.take(8) as u8;
            }
        }
        Ok(())
    }
}
