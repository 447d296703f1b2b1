//! ## Register iteration
//! Walks the registers of a [`PipelineSource`] in ascending index order regardless of the
//! representation backing it.
//!
//! - Dense cursor visits every index in `0..M`, reading `W`-bit registers packed into `u32` words.
//! - Sparse cursor visits only the stored entries, decoding each `(index << W) | rank` entry
//!   without materializing the dense register array.
//!
//! The variant is picked once when [`RegisterIter`] is created and never changes afterwards.

use enum_dispatch::enum_dispatch;

use crate::estimator::PipelineSource;

/// Widest register a cursor can decode into [`Register::value`]
pub const MAX_REGISTER_WIDTH: usize = 8;

/// Single HyperLogLog register
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register {
    /// Register index in `[0..M)` range
    pub index: u32,
    /// Register rank
    pub value: u8,
}

impl Register {
    #[inline]
    pub fn new(index: u32, value: u8) -> Self {
        Self { index, value }
    }
}

/// Cursor trait implemented by both register cursors.
#[enum_dispatch(RegisterIter)]
pub trait RegisterCursor {
    /// Whether all registers were visited
    fn done(&self) -> bool;
    /// Return next register, or `None` once the cursor is done
    fn next_register(&mut self) -> Option<Register>;
    /// Number of registers left to visit
    fn remaining(&self) -> usize;
    /// Register width in bits
    fn width(&self) -> usize;
}

/// Backing-agnostic register iterator
#[enum_dispatch]
#[derive(Debug, Clone)]
pub enum RegisterIter<'a> {
    Dense(DenseRegisters<'a>),
    Sparse(SparseRegisters<'a>),
}

impl<'a> RegisterIter<'a> {
    /// Create fresh iterator over registers of `source`
    #[inline]
    pub fn new<S: PipelineSource + ?Sized>(source: &'a S) -> Self {
        if source.is_sparse() {
            RegisterIter::from(source.sparse_registers())
        } else {
            RegisterIter::from(source.dense_registers())
        }
    }
}

impl Iterator for RegisterIter<'_> {
    type Item = Register;

    #[inline]
    fn next(&mut self) -> Option<Register> {
        self.next_register()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// Cursor over a dense register array.
///
/// Registers are `width` bits wide and packed least significant bit first into `u32` words,
/// so a register may straddle two consecutive words. Conversions reject cursors whose width
/// is outside of `[1..=MAX_REGISTER_WIDTH]` before reading any register.
#[derive(Debug, Clone)]
pub struct DenseRegisters<'a> {
    words: &'a [u32],
    width: usize,
    idx: u32,
    len: u32,
}

impl<'a> DenseRegisters<'a> {
    /// Create cursor over `len` registers of `width` bits stored in `words`
    #[inline]
    pub fn new(words: &'a [u32], width: usize, len: u32) -> Self {
        Self {
            words,
            width,
            idx: 0,
            len,
        }
    }

    /// Cursor which yields no registers
    #[inline]
    pub fn empty() -> Self {
        Self::new(&[], 6, 0)
    }
}

impl RegisterCursor for DenseRegisters<'_> {
    #[inline]
    fn done(&self) -> bool {
        self.idx == self.len
    }

    #[inline]
    fn next_register(&mut self) -> Option<Register> {
        if self.done() {
            return None;
        }
        let idx = self.idx;
        self.idx += 1;
        let value = get_register(self.words, self.width, idx);
        Some(Register::new(idx, saturate(value)))
    }

    #[inline]
    fn remaining(&self) -> usize {
        (self.len - self.idx) as usize
    }

    #[inline]
    fn width(&self) -> usize {
        self.width
    }
}

/// Cursor over a sparse list of encoded register entries.
///
/// Entries should be ascending by register index with at most one entry per index;
/// EXPLICIT conversion rejects duplicate indices.
#[derive(Debug, Clone)]
pub struct SparseRegisters<'a> {
    entries: std::slice::Iter<'a, u32>,
    precision: u8,
    width: usize,
}

impl<'a> SparseRegisters<'a> {
    /// Create cursor over `entries` encoded as `(index << width) | rank`
    #[inline]
    pub fn new(entries: &'a [u32], precision: u8, width: usize) -> Self {
        Self {
            entries: entries.iter(),
            precision,
            width,
        }
    }

    /// Cursor which yields no registers
    #[inline]
    pub fn empty() -> Self {
        Self::new(&[], 4, 6)
    }

    /// Precision used to mask decoded register indices
    #[inline]
    pub fn precision(&self) -> u8 {
        self.precision
    }
}

impl RegisterCursor for SparseRegisters<'_> {
    #[inline]
    fn done(&self) -> bool {
        self.entries.as_slice().is_empty()
    }

    #[inline]
    fn next_register(&mut self) -> Option<Register> {
        let &h = self.entries.next()?;
        Some(decode_hash(h, self.precision, self.width))
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn width(&self) -> usize {
        self.width
    }
}

/// Return register index and rank from encoded sparse entry
#[inline]
pub fn decode_hash(h: u32, precision: u8, width: usize) -> Register {
    let rank = h & ((1 << width) - 1);
    let idx = (h >> width) & ((1 << precision) - 1);
    Register::new(idx, saturate(rank))
}

/// Narrow register value, saturating values which do not fit into `u8`
#[inline]
fn saturate(value: u32) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Encode register index and rank into sparse entry
#[inline]
pub fn encode_hash(idx: u32, rank: u8, width: usize) -> u32 {
    (idx << width) | (u32::from(rank) & ((1 << width) - 1))
}

/// Get `idx` register of `width` bits from packed `words`.
///
/// Words past the end of `words` read as zero.
#[inline]
pub(crate) fn get_register(words: &[u32], width: usize, idx: u32) -> u32 {
    let bit_idx = (idx as usize) * width;
    let u32_idx = bit_idx / 32;
    let bit_pos = bit_idx % 32;
    let bits_1 = width.min(32 - bit_pos);
    let bits_2 = width - bits_1;
    let mask_1 = (1 << bits_1) - 1;
    let mask_2 = (1 << bits_2) - 1;
    let lo = words.get(u32_idx).copied().unwrap_or(0);
    let hi = words.get(u32_idx + 1).copied().unwrap_or(0);

    ((lo >> bit_pos) & mask_1) | ((hi & mask_2) << bits_1)
}
