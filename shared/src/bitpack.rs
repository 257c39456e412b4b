//! Bit-granular serialization cursor used for all wire framing.
//!
//! Packets are sent at a fixed tick rate, so small enumerations and flags
//! are packed at bit granularity instead of paying full-byte cost. The
//! codec owns a word-aligned buffer and keeps independent write and read
//! cursors; both overflow and read-past-end are checked error conditions
//! since packet contents are peer-influenced.

use thiserror::Error;

/// Errors produced by [`BitPack`] operations. Never panics on bad input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitPackError {
    #[error("bit count {0} outside supported range 1..=32")]
    InvalidBitCount(u32),
    #[error("write of {requested} bits exceeds capacity ({capacity} bits)")]
    Overflow { requested: u32, capacity: usize },
    #[error("read of {requested} bits past written extent ({written} bits, cursor {cursor})")]
    ReadPastEnd {
        requested: u32,
        written: usize,
        cursor: usize,
    },
}

/// Bit-level read/write cursor over an owned, word-aligned buffer.
///
/// Values are packed least-significant-bit first into 32-bit words stored
/// little-endian, so byte-aligned writes produce little-endian byte layout.
#[derive(Debug, Clone)]
pub struct BitPack {
    words: Vec<u32>,
    /// Staging area for bits not yet committed to a full word.
    scratch: u64,
    scratch_bits: u32,
    /// Index of the next word to be committed.
    word_index: usize,
    bits_written: usize,
    /// Read cursor, in bits from the start of the stream.
    bit_index: usize,
    overflow: bool,
}

impl BitPack {
    /// Allocates a codec with at least `capacity_bytes` of backing store,
    /// rounded up to whole words.
    pub fn new(capacity_bytes: usize) -> Self {
        let num_words = capacity_bytes.div_ceil(4).max(1);
        Self {
            words: vec![0u32; num_words],
            scratch: 0,
            scratch_bits: 0,
            word_index: 0,
            bits_written: 0,
            bit_index: 0,
            overflow: false,
        }
    }

    /// Wraps received bytes for reading. The written extent covers the
    /// whole slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut bp = Self::new(data.len().max(1));
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            bp.words[bp.word_index] = u32::from_le_bytes(word);
            bp.word_index += 1;
        }
        bp.bits_written = data.len() * 8;
        bp
    }

    /// Total capacity in bits.
    pub fn capacity_bits(&self) -> usize {
        self.words.len() * 32
    }

    /// Number of bits appended so far.
    pub fn bits_written(&self) -> usize {
        self.bits_written
    }

    /// Number of whole bytes needed to hold the written bits.
    pub fn bytes_written(&self) -> usize {
        self.bits_written.div_ceil(8)
    }

    /// True once a write has been refused for capacity. Sticky until
    /// [`clear`](Self::clear).
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Appends the low `num_bits` of `value`. Crosses word boundaries
    /// transparently. Once capacity is exceeded the overflow flag is set
    /// and every further write fails.
    pub fn write(&mut self, num_bits: u32, value: u32) -> Result<(), BitPackError> {
        if num_bits == 0 || num_bits > 32 {
            return Err(BitPackError::InvalidBitCount(num_bits));
        }
        if self.overflow || self.bits_written + num_bits as usize > self.capacity_bits() {
            self.overflow = true;
            return Err(BitPackError::Overflow {
                requested: num_bits,
                capacity: self.capacity_bits(),
            });
        }

        let mask = if num_bits == 32 {
            u32::MAX
        } else {
            (1u32 << num_bits) - 1
        };
        self.scratch |= u64::from(value & mask) << self.scratch_bits;
        self.scratch_bits += num_bits;
        self.bits_written += num_bits as usize;

        while self.scratch_bits >= 32 {
            self.words[self.word_index] = self.scratch as u32;
            self.word_index += 1;
            self.scratch >>= 32;
            self.scratch_bits -= 32;
        }

        Ok(())
    }

    /// Appends raw bytes, eight bits at a time. Alignment is not required.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), BitPackError> {
        for &b in data {
            self.write(8, u32::from(b))?;
        }
        Ok(())
    }

    /// Extracts the next `num_bits` as an unsigned value, advancing the
    /// read cursor. Reading past the written extent is an error, not UB.
    pub fn read(&mut self, num_bits: u32) -> Result<u32, BitPackError> {
        if num_bits == 0 || num_bits > 32 {
            return Err(BitPackError::InvalidBitCount(num_bits));
        }
        if self.bit_index + num_bits as usize > self.bits_written {
            return Err(BitPackError::ReadPastEnd {
                requested: num_bits,
                written: self.bits_written,
                cursor: self.bit_index,
            });
        }

        let mut value = 0u32;
        for i in 0..num_bits {
            if self.bit_at(self.bit_index + i as usize) {
                value |= 1 << i;
            }
        }
        self.bit_index += num_bits as usize;
        Ok(value)
    }

    /// Reads `len` raw bytes into `dst`.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), BitPackError> {
        for b in dst.iter_mut() {
            *b = self.read(8)? as u8;
        }
        Ok(())
    }

    /// Resets the read cursor to the start of the stream.
    pub fn seek_begin(&mut self) {
        self.bit_index = 0;
    }

    /// Positions the read cursor immediately after the last written bit.
    pub fn seek_to_written(&mut self) {
        self.bit_index = self.bits_written;
    }

    /// Commits any partially-filled trailing word so it is visible to
    /// byte export. Idempotent; further writes continue where they were.
    pub fn flush(&mut self) {
        if self.scratch_bits > 0 {
            self.words[self.word_index] = self.scratch as u32;
        }
    }

    /// Copies the written bytes into `dst`. Flushes first so trailing
    /// bits are included. Returns the number of bytes copied.
    pub fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        self.flush();
        let len = self.bytes_written().min(dst.len());
        for (i, b) in dst.iter_mut().enumerate().take(len) {
            *b = (self.words[i / 4] >> ((i % 4) * 8)) as u8;
        }
        len
    }

    /// Exports the written bytes, for embedding into a transport payload.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        self.flush();
        let mut out = vec![0u8; self.bytes_written()];
        self.copy_to(&mut out);
        out
    }

    /// Scoped reset: zeroes cursors and the overflow flag, keeps capacity.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.scratch = 0;
        self.scratch_bits = 0;
        self.word_index = 0;
        self.bits_written = 0;
        self.bit_index = 0;
        self.overflow = false;
    }

    fn bit_at(&self, pos: usize) -> bool {
        let word = pos / 32;
        if word < self.word_index {
            (self.words[word] >> (pos % 32)) & 1 == 1
        } else {
            (self.scratch >> (pos - self.word_index * 32)) & 1 == 1
        }
    }
}
