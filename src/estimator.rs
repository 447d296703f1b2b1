//! Estimator side of the conversion.
//!
//! [`PipelineSource`] is the narrow interface the encoder needs from a HyperLogLog++ estimator:
//! its cardinality, precision, representation and the two register cursors.
//!
//! [`Sketch`] is a register snapshot implementing that interface and is defined with const `P` and `W` parameters:
//! - `P`: precision parameter in [4..18] range, which defines
//!   number of bits to use for HyperLogLog register indices.
//! - `W`: width parameter in [4..6] range, which defines
//!   number of bits to use for HyperLogLog register width.
//!
//! # Data storage format
//!
//! ## Sparse representation
//! - `Vec<u32>` of encoded entries `(index << W) | rank`, sorted ascending,
//!   storing at most one entry per register index.
//!
//! ## Dense representation
//! - `ceil(M * W / 32) + 1` `u32` words storing register ranks using `W` bits per each register,
//!   plus one extra word allowing branchless updates of the last register.
//!
//! `Sketch` does not hash items or estimate cardinality on its own: the cardinality
//! reported through [`PipelineSource::count`] is whatever the owner last stored with [`Sketch::set_count`].

use std::fmt::{Debug, Formatter};

use crate::registers::{decode_hash, encode_hash, get_register, DenseRegisters, SparseRegisters};

/// Interface of a HyperLogLog++ estimator which can be written as PipelineDB HLL.
///
/// Callers must not mutate the estimator while a conversion is in progress.
pub trait PipelineSource {
    /// Cardinality embedded into the preamble
    fn count(&self) -> u64;
    /// Precision `p`, so that there are `2^p` registers
    fn precision(&self) -> u8;
    /// Number of registers `m`
    fn register_count(&self) -> u32 {
        1 << self.precision()
    }
    /// Whether the estimator is backed by sparse representation
    fn is_sparse(&self) -> bool;
    /// Cursor over dense register array, only used when `is_sparse()` is false
    fn dense_registers(&self) -> DenseRegisters<'_>;
    /// Cursor over sparse entries, only used when `is_sparse()` is true
    fn sparse_registers(&self) -> SparseRegisters<'_>;
}

#[derive(Clone, PartialEq)]
pub(crate) enum Representation {
    Sparse(Vec<u32>),
    Dense(Vec<u32>),
}

/// HyperLogLog++ register snapshot
#[derive(Clone, PartialEq)]
pub struct Sketch<const P: usize = 12, const W: usize = 6> {
    pub(crate) count: u64,
    pub(crate) representation: Representation,
}

impl<const P: usize, const W: usize> Sketch<P, W> {
    /// Ensure that `P` and `W` are in correct range at compile time
    const VALID_PARAMS: () = assert!(P >= 4 && P <= 18 && W >= 4 && W <= 6);
    /// Number of HyperLogLog registers
    pub const M: usize = 1 << P;
    /// Dense representation `u32` slice length based on #registers and
    /// one extra element for branchless register updates (see `set_register` for more details).
    pub const DENSE_LEN: usize = (Self::M * W).div_ceil(32) + 1;
    /// Maximum rank which fits into `W` bits
    const MAX_RANK: u8 = ((1 << W) - 1) as u8;

    /// Creates new empty sketch with sparse representation
    #[inline]
    pub fn new() -> Self {
        // compile time check of params
        _ = Self::VALID_PARAMS;

        Self {
            count: 0,
            representation: Representation::Sparse(Vec::new()),
        }
    }

    /// Creates new empty sketch with dense representation
    #[inline]
    pub fn new_dense() -> Self {
        _ = Self::VALID_PARAMS;

        Self {
            count: 0,
            representation: Representation::Dense(vec![0u32; Self::DENSE_LEN]),
        }
    }

    /// Set cardinality reported by this sketch
    #[inline]
    pub fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    /// Builder-style variant of `set_count`
    #[inline]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Return `idx` register rank
    #[inline]
    pub fn register(&self, idx: u32) -> u8 {
        debug_assert!((idx as usize) < Self::M);
        match &self.representation {
            Representation::Sparse(entries) => {
                match entries.binary_search_by_key(&idx, |&h| h >> W) {
                    Ok(pos) => decode_hash(entries[pos], P as u8, W).value,
                    Err(_) => 0,
                }
            }
            Representation::Dense(data) => get_register(data, W, idx) as u8,
        }
    }

    /// Raise `idx` register to `rank` unless it already holds a higher rank.
    ///
    /// Ranks which do not fit into `W` bits are clamped to the maximum rank.
    #[inline]
    pub fn set_register(&mut self, idx: u32, rank: u8) {
        assert!((idx as usize) < Self::M, "register index {} out of range", idx);
        let rank = rank.min(Self::MAX_RANK);
        match &mut self.representation {
            Representation::Sparse(entries) => {
                match entries.binary_search_by_key(&idx, |&h| h >> W) {
                    Ok(pos) => {
                        if decode_hash(entries[pos], P as u8, W).value < rank {
                            entries[pos] = encode_hash(idx, rank, W);
                        }
                    }
                    Err(_) if rank == 0 => {}
                    Err(pos) => entries.insert(pos, encode_hash(idx, rank, W)),
                }
            }
            Representation::Dense(data) => {
                if get_register(data, W, idx) < u32::from(rank) {
                    set_register::<W>(data, idx, u32::from(rank));
                }
            }
        }
    }

    /// Convert sparse representation into dense representation
    pub fn to_dense(&mut self) {
        if let Representation::Sparse(entries) = &self.representation {
            let mut data = vec![0u32; Self::DENSE_LEN];
            for &h in entries {
                let r = decode_hash(h, P as u8, W);
                set_register::<W>(&mut data, r.index, u32::from(r.value));
            }
            self.representation = Representation::Dense(data);
        }
    }

    /// Return number of registers with non-zero rank
    pub fn len(&self) -> usize {
        match &self.representation {
            Representation::Sparse(entries) => entries.len(),
            Representation::Dense(data) => (0..Self::M as u32)
                .filter(|&idx| get_register(data, W, idx) != 0)
                .count(),
        }
    }

    /// Return whether all registers are zero
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const P: usize, const W: usize> PipelineSource for Sketch<P, W> {
    #[inline]
    fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    fn precision(&self) -> u8 {
        P as u8
    }

    #[inline]
    fn is_sparse(&self) -> bool {
        matches!(self.representation, Representation::Sparse(_))
    }

    #[inline]
    fn dense_registers(&self) -> DenseRegisters<'_> {
        match &self.representation {
            Representation::Dense(data) => DenseRegisters::new(data, W, Self::M as u32),
            Representation::Sparse(_) => DenseRegisters::empty(),
        }
    }

    #[inline]
    fn sparse_registers(&self) -> SparseRegisters<'_> {
        match &self.representation {
            Representation::Sparse(entries) => SparseRegisters::new(entries, P as u8, W),
            Representation::Dense(_) => SparseRegisters::empty(),
        }
    }
}

impl<const P: usize, const W: usize> Default for Sketch<P, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const P: usize, const W: usize> Debug for Sketch<P, W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let representation = if self.is_sparse() { "Sparse" } else { "Dense" };
        write!(
            f,
            "{{ representation: {}, count: {}, registers: {} }}",
            representation,
            self.count,
            self.len()
        )
    }
}

/// Set HyperLogLog `idx` register to new value `rank`
#[inline]
fn set_register<const W: usize>(data: &mut [u32], idx: u32, new_rank: u32) {
    let bit_idx = (idx as usize) * W;
    let u32_idx = bit_idx / 32;
    let bit_pos = bit_idx % 32;
    let bits = &mut data[u32_idx..u32_idx + 2];
    let bits_1 = W.min(32 - bit_pos);
    let bits_2 = W - bits_1;
    let mask_1 = (1 << bits_1) - 1;
    let mask_2 = (1 << bits_2) - 1;

    // Unconditionally update two `u32` elements based on `new_rank` bits and masks
    bits[0] &= !(mask_1 << bit_pos);
    bits[0] |= (new_rank & mask_1) << bit_pos;
    bits[1] &= !mask_2;
    bits[1] |= (new_rank >> bits_1) & mask_2;
}
