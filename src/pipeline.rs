//! # PipelineDB HLL conversion
//!
//! Converts any [`PipelineSource`] into the byte layout PipelineDB persists for its `hll` type:
//!
//! ```text
//! [tag:1][pad:3][cardinality:8 LE][precision:1][pad:3][payload length:4 LE][payload]
//! ```
//!
//! The payload is either
//! - DENSE: `1 + ceil(M * 6 / 8)` bytes of 6-bit registers packed least significant bit first, or
//! - EXPLICIT: non-zero registers sorted by index, each as a little endian `u32` `(index << 8) | value`.
//!
//! Dense sources are always written as DENSE. Sparse sources are written as EXPLICIT unless
//! `always_write_dense` is set or they hold more than `max_explicit_registers` registers, in which
//! case the explicit attempt is discarded and a fresh DENSE conversion is performed.
//!
//! Conversions are pure: the same source and config always produce the same bytes, and
//! nothing is returned or written on failure.

use std::io::Write;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::dense;
use crate::error::PipelineError;
use crate::estimator::PipelineSource;
use crate::explicit::{self, Explicit};
use crate::preamble::{Encoding, Preamble, PREAMBLE_LEN};
use crate::registers::{RegisterCursor, RegisterIter, MAX_REGISTER_WIDTH};

/// Minimum supported precision
pub const MIN_PRECISION: u8 = 4;
/// Maximum supported precision
pub const MAX_PRECISION: u8 = 18;
/// Default maximum number of registers written in EXPLICIT form.
///
/// PipelineDB itself keeps up to 8192 explicit registers, but unions of explicit HLLs
/// misbehave at medium cardinalities well below that.
pub const DEFAULT_MAX_EXPLICIT_REGISTERS: usize = 600;

/// PipelineDB conversion settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "with_serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PipelineConfig {
    /// Write DENSE payload even for sparse sources
    pub always_write_dense: bool,
    /// Use dirty encoding tags, making PipelineDB recompute cardinality on read
    pub write_dirty_encoding: bool,
    /// Registers above this limit make sparse sources fall back to DENSE payload
    pub max_explicit_registers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            always_write_dense: false,
            write_dirty_encoding: false,
            max_explicit_registers: DEFAULT_MAX_EXPLICIT_REGISTERS,
        }
    }
}

impl PipelineConfig {
    pub fn with_always_write_dense(mut self, always_write_dense: bool) -> Self {
        self.always_write_dense = always_write_dense;
        self
    }

    pub fn with_write_dirty_encoding(mut self, write_dirty_encoding: bool) -> Self {
        self.write_dirty_encoding = write_dirty_encoding;
        self
    }

    pub fn with_max_explicit_registers(mut self, max_explicit_registers: usize) -> Self {
        self.max_explicit_registers = max_explicit_registers;
        self
    }
}

/// Payload mode picked for a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Dense,
    Explicit,
}

/// Pick payload mode for `source`
#[inline]
pub(crate) fn select_mode<S: PipelineSource + ?Sized>(source: &S, config: &PipelineConfig) -> Mode {
    if !source.is_sparse() || config.always_write_dense {
        Mode::Dense
    } else {
        Mode::Explicit
    }
}

/// Convert `source` into PipelineDB HLL bytes
pub fn to_pipeline<S: PipelineSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
) -> Result<Bytes, PipelineError> {
    validate(source)?;
    match select_mode(source, config) {
        Mode::Dense => convert_to_dense(source, config),
        Mode::Explicit => convert_to_explicit(source, config),
    }
}

/// Convert `source` into PipelineDB HLL bytes and write them to `sink` with a single `write` call.
///
/// Returns number of bytes written. Rejected and partial writes are reported as errors and
/// are not retried.
pub fn write_pipeline<S: PipelineSource + ?Sized, W: Write + ?Sized>(
    source: &S,
    config: &PipelineConfig,
    sink: &mut W,
) -> Result<usize, PipelineError> {
    let bytes = to_pipeline(source, config)?;
    let written = sink.write(&bytes)?;
    if written != bytes.len() {
        warn!(written, expected = bytes.len(), "short pipeline hll write");
        return Err(PipelineError::ShortWrite {
            written,
            expected: bytes.len(),
        });
    }
    Ok(written)
}

/// Extension trait converting estimators into PipelineDB HLL
pub trait AsPipeline: PipelineSource {
    /// Convert estimator into PipelineDB HLL bytes
    fn as_pipeline(&self, config: &PipelineConfig) -> Result<Bytes, PipelineError> {
        to_pipeline(self, config)
    }

    /// Convert estimator into PipelineDB HLL bytes and write them to `sink`
    fn write_pipeline<W: Write + ?Sized>(
        &self,
        config: &PipelineConfig,
        sink: &mut W,
    ) -> Result<usize, PipelineError> {
        write_pipeline(self, config, sink)
    }
}

impl<T: PipelineSource + ?Sized> AsPipeline for T {}

/// Check precision, register count and register cursor reported by `source`
fn validate<S: PipelineSource + ?Sized>(source: &S) -> Result<(), PipelineError> {
    let precision = source.precision();
    if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        return Err(PipelineError::InvalidPrecision(precision));
    }
    let register_count = source.register_count();
    if register_count != 1 << precision {
        return Err(PipelineError::RegisterCountMismatch {
            precision,
            register_count,
        });
    }
    let registers = RegisterIter::new(source);
    let width = registers.width();
    if !(1..=MAX_REGISTER_WIDTH).contains(&width) {
        return Err(PipelineError::InvalidRegisterWidth(width));
    }
    if let RegisterIter::Sparse(sparse) = &registers {
        if sparse.precision() != precision {
            return Err(PipelineError::SparsePrecisionMismatch {
                precision,
                cursor_precision: sparse.precision(),
            });
        }
    }
    Ok(())
}

fn convert_to_dense<S: PipelineSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
) -> Result<Bytes, PipelineError> {
    let m = source.register_count();
    let payload_len = dense::payload_len(m);
    let preamble = Preamble {
        encoding: Encoding::dense(config.write_dirty_encoding),
        cardinality: source.count(),
        precision: source.precision(),
        payload_len: payload_len as u32,
    };

    let mut out = BytesMut::with_capacity(PREAMBLE_LEN + payload_len);
    preamble.write_to(&mut out);
    dense::write_payload(&mut out, RegisterIter::new(source), m)?;

    trace!(encoding = ?preamble.encoding, payload_len, "converted hll to pipeline");
    Ok(out.freeze())
}

fn convert_to_explicit<S: PipelineSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
) -> Result<Bytes, PipelineError> {
    let m = source.register_count();
    let registers = match explicit::collect(
        RegisterIter::new(source),
        m,
        config.max_explicit_registers,
    )? {
        Explicit::Registers(registers) => registers,
        Explicit::Overflow => {
            debug!(
                max_explicit_registers = config.max_explicit_registers,
                "too many registers for explicit pipeline hll, falling back to dense"
            );
            return convert_to_dense(source, config);
        }
    };

    let payload_len = explicit::payload_len(registers.len());
    let preamble = Preamble {
        encoding: Encoding::explicit(config.write_dirty_encoding),
        cardinality: source.count(),
        precision: source.precision(),
        payload_len: payload_len as u32,
    };

    let mut out = BytesMut::with_capacity(PREAMBLE_LEN + payload_len);
    preamble.write_to(&mut out);
    explicit::write_payload(&mut out, &registers);

    trace!(encoding = ?preamble.encoding, payload_len, "converted hll to pipeline");
    Ok(out.freeze())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::estimator::Sketch;
    use crate::registers::{DenseRegisters, SparseRegisters};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io;
    use test_case::test_case;

    /// Sketch with registers 3 and 10 set, matching the PipelineDB reference dump
    fn two_register_sketch() -> Sketch<4, 6> {
        let mut sketch = Sketch::<4, 6>::new().with_count(2);
        sketch.set_register(3, 5);
        sketch.set_register(10, 12);
        sketch
    }

    fn random_sketch<const P: usize>(seed: u64, n: usize) -> Sketch<P, 6> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sketch = Sketch::<P, 6>::new().with_count(n as u64);
        for _ in 0..n {
            sketch.set_register(rng.gen_range(0..1 << P), rng.gen_range(1..64));
        }
        sketch
    }

    fn preamble_of(bytes: &[u8]) -> Preamble {
        Preamble {
            encoding: Encoding::try_from(bytes[0]).unwrap(),
            cardinality: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            precision: bytes[12],
            payload_len: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        }
    }

    #[test]
    fn test_sparse_source_as_explicit() {
        let bytes = two_register_sketch()
            .as_pipeline(&PipelineConfig::default())
            .unwrap();
        assert_eq!(
            &bytes[..],
            &[
                b'E', 0, 0, 0, // encoding
                2, 0, 0, 0, 0, 0, 0, 0, // cardinality
                4, 0, 0, 0, // precision
                8, 0, 0, 0, // payload length
                5, 3, 0, 0, // register 3 = 5
                12, 10, 0, 0, // register 10 = 12
            ]
        );
    }

    #[test]
    fn test_sparse_source_always_dense() {
        let config = PipelineConfig::default().with_always_write_dense(true);
        let bytes = two_register_sketch().as_pipeline(&config).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                b'D', 0, 0, 0, // encoding
                2, 0, 0, 0, 0, 0, 0, 0, // cardinality
                4, 0, 0, 0, // precision
                13, 0, 0, 0, // payload length
                0, 0, 20, 0, 0, 0, 0, 192, 0, 0, 0, 0, 0, // registers
            ]
        );
    }

    #[test]
    fn test_dense_source_matches_sparse_source() {
        let sparse = random_sketch::<10>(1, 300);
        let mut dense = sparse.clone();
        dense.to_dense();

        let config = PipelineConfig::default();
        let dense_bytes = dense.as_pipeline(&config).unwrap();
        let sparse_bytes = sparse
            .as_pipeline(&config.with_always_write_dense(true))
            .unwrap();
        assert_eq!(dense_bytes, sparse_bytes);
        assert_eq!(dense_bytes[0], b'D');
    }

    #[test_case(false, false => b'E')]
    #[test_case(false, true => b'e')]
    #[test_case(true, false => b'D')]
    #[test_case(true, true => b'd')]
    fn test_encoding_tag(always_write_dense: bool, write_dirty_encoding: bool) -> u8 {
        let config = PipelineConfig::default()
            .with_always_write_dense(always_write_dense)
            .with_write_dirty_encoding(write_dirty_encoding);
        two_register_sketch().as_pipeline(&config).unwrap()[0]
    }

    #[test_case(0 => b'E'; "empty")]
    #[test_case(1 => b'E'; "single register")]
    #[test_case(600 => b'E'; "at limit")]
    #[test_case(601 => b'D'; "over limit")]
    #[test_case(4096 => b'D'; "all registers")]
    fn test_explicit_fallback(n: u32) -> u8 {
        let mut sketch = Sketch::<12, 6>::new().with_count(u64::from(n));
        for idx in 0..n {
            sketch.set_register(idx, 1);
        }
        let bytes = sketch.as_pipeline(&PipelineConfig::default()).unwrap();
        let preamble = preamble_of(&bytes);
        let expected_len = if bytes[0] == b'E' { n as usize * 4 } else { 3073 };
        assert_eq!(preamble.payload_len as usize, expected_len);
        assert_eq!(bytes.len(), PREAMBLE_LEN + expected_len);
        bytes[0]
    }

    #[test]
    fn test_fallback_respects_configured_limit() {
        let sketch = two_register_sketch();
        let config = PipelineConfig::default().with_max_explicit_registers(1);
        let bytes = sketch.as_pipeline(&config).unwrap();
        let dense = sketch
            .as_pipeline(&PipelineConfig::default().with_always_write_dense(true))
            .unwrap();
        assert_eq!(bytes, dense);
    }

    #[test]
    fn test_dense_roundtrip() {
        let mut sketch = random_sketch::<12>(7, 2000);
        sketch.to_dense();
        let bytes = sketch.as_pipeline(&PipelineConfig::default()).unwrap();
        let preamble = preamble_of(&bytes);
        assert_eq!(preamble.encoding, Encoding::DenseClean);
        assert_eq!(preamble.cardinality, 2000);
        assert_eq!(preamble.precision, 12);
        assert_eq!(preamble.payload_len, 3073);

        let payload = &bytes[PREAMBLE_LEN..];
        for idx in 0..4096 {
            assert_eq!(
                dense::get_register(payload, idx),
                sketch.register(idx),
                "register {}",
                idx
            );
        }
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(3)]
    fn test_explicit_words_ascending(seed: u64) {
        let sketch = random_sketch::<14>(seed, 500);
        let bytes = sketch.as_pipeline(&PipelineConfig::default()).unwrap();
        assert_eq!(bytes[0], b'E');
        let words: Vec<u32> = bytes[PREAMBLE_LEN..]
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes(w.try_into().unwrap()))
            .collect();
        assert_eq!(words.len(), sketch.len());
        assert_eq!(preamble_of(&bytes).payload_len as usize, words.len() * 4);
        assert!(words.windows(2).all(|w| (w[0] >> 8) < (w[1] >> 8)));
        for w in words {
            assert_eq!((w & 0xff) as u8, sketch.register(w >> 8));
        }
    }

    #[test_case(4)]
    #[test_case(18)]
    fn test_preamble_len_independent_of_mode(p: u8) {
        for always_write_dense in [false, true] {
            let config = PipelineConfig::default().with_always_write_dense(always_write_dense);
            let bytes = match p {
                4 => Sketch::<4, 6>::new().as_pipeline(&config),
                _ => Sketch::<18, 6>::new().as_pipeline(&config),
            }
            .unwrap();
            let preamble = preamble_of(&bytes);
            assert_eq!(preamble.precision, p);
            assert_eq!(bytes.len(), PREAMBLE_LEN + preamble.payload_len as usize);
        }
    }

    /// Source reporting arbitrary, possibly inconsistent, parameters
    struct RawSource {
        precision: u8,
        register_count: u32,
        sparse: bool,
        width: usize,
        cursor_precision: u8,
        words: Vec<u32>,
        entries: Vec<u32>,
    }

    impl PipelineSource for RawSource {
        fn count(&self) -> u64 {
            0
        }

        fn precision(&self) -> u8 {
            self.precision
        }

        fn register_count(&self) -> u32 {
            self.register_count
        }

        fn is_sparse(&self) -> bool {
            self.sparse
        }

        fn dense_registers(&self) -> DenseRegisters<'_> {
            DenseRegisters::new(&self.words, self.width, self.register_count)
        }

        fn sparse_registers(&self) -> SparseRegisters<'_> {
            SparseRegisters::new(&self.entries, self.cursor_precision, self.width)
        }
    }

    fn raw_source(precision: u8, register_count: u32) -> RawSource {
        RawSource {
            precision,
            register_count,
            sparse: true,
            width: 6,
            cursor_precision: precision,
            words: Vec::new(),
            entries: Vec::new(),
        }
    }

    #[test_case(3; "below minimum")]
    #[test_case(19; "above maximum")]
    fn test_invalid_precision(p: u8) {
        let err = raw_source(p, 1 << p).as_pipeline(&PipelineConfig::default());
        assert!(matches!(err, Err(PipelineError::InvalidPrecision(x)) if x == p));
    }

    #[test]
    fn test_register_count_mismatch() {
        let err = raw_source(4, 17).as_pipeline(&PipelineConfig::default());
        assert!(matches!(
            err,
            Err(PipelineError::RegisterCountMismatch {
                precision: 4,
                register_count: 17
            })
        ));
    }

    #[test]
    fn test_register_value_overflow() {
        let mut source = raw_source(4, 16);
        source.sparse = false;
        source.width = 8;
        // 8-bit wide registers, register 1 holds 64
        source.words = vec![64 << 8, 0, 0, 0, 0];
        let err = source.as_pipeline(&PipelineConfig::default());
        assert!(matches!(
            err,
            Err(PipelineError::RegisterValueOverflow { index: 1, value: 64 })
        ));
    }

    #[test]
    fn test_wide_dense_register_rejected() {
        let mut source = raw_source(4, 16);
        source.sparse = false;
        source.width = 9;
        // 9-bit register 0 holds 261, whose low byte alone would pass as 5
        source.words = vec![261, 0, 0, 0, 0];
        let err = source.as_pipeline(&PipelineConfig::default());
        assert!(matches!(err, Err(PipelineError::InvalidRegisterWidth(9))));
    }

    #[test_case(true, 0; "sparse zero width")]
    #[test_case(true, 9; "sparse 9 bits")]
    #[test_case(true, 32; "sparse 32 bits")]
    #[test_case(false, 0; "dense zero width")]
    #[test_case(false, 64; "dense 64 bits")]
    fn test_invalid_register_width(sparse: bool, width: usize) {
        let mut source = raw_source(4, 16);
        source.sparse = sparse;
        source.width = width;
        source.entries = vec![u32::MAX];
        for always_write_dense in [false, true] {
            let config = PipelineConfig::default().with_always_write_dense(always_write_dense);
            let err = source.as_pipeline(&config);
            assert!(matches!(err, Err(PipelineError::InvalidRegisterWidth(w)) if w == width));
        }
    }

    #[test]
    fn test_sparse_precision_mismatch() {
        let mut source = raw_source(4, 16);
        source.cursor_precision = 40;
        let err = source.as_pipeline(&PipelineConfig::default());
        assert!(matches!(
            err,
            Err(PipelineError::SparsePrecisionMismatch {
                precision: 4,
                cursor_precision: 40
            })
        ));
    }

    #[test_case(false; "explicit")]
    #[test_case(true; "dense")]
    fn test_duplicate_sparse_register(always_write_dense: bool) {
        let mut source = raw_source(4, 16);
        source.entries = vec![(3 << 6) | 5, (3 << 6) | 7];
        let config = PipelineConfig::default().with_always_write_dense(always_write_dense);
        let err = source.as_pipeline(&config);
        assert!(matches!(err, Err(PipelineError::DuplicateRegister { index: 3 })));
    }

    #[test_case(600; "explicit")]
    #[test_case(0; "fallback to dense")]
    fn test_sparse_value_overflow_on_every_path(max_explicit_registers: usize) {
        let mut source = raw_source(4, 16);
        source.width = 8;
        source.entries = vec![(2 << 8) | 1, (6 << 8) | 64];
        let config = PipelineConfig::default().with_max_explicit_registers(max_explicit_registers);
        let err = source.as_pipeline(&config);
        assert!(matches!(
            err,
            Err(PipelineError::RegisterValueOverflow { index: 6, value: 64 })
        ));
    }

    /// Sink accepting at most `limit` bytes per write
    struct LimitedSink {
        limit: usize,
        written: Vec<u8>,
    }

    impl Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Sink rejecting every write
    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_pipeline() {
        let sketch = two_register_sketch();
        let mut sink = Vec::new();
        let written = sketch
            .write_pipeline(&PipelineConfig::default(), &mut sink)
            .unwrap();
        assert_eq!(written, 28);
        assert_eq!(&sink[..], &sketch.as_pipeline(&PipelineConfig::default()).unwrap()[..]);
    }

    #[test]
    fn test_write_pipeline_short_write() {
        let mut sink = LimitedSink {
            limit: 10,
            written: Vec::new(),
        };
        let err = two_register_sketch().write_pipeline(&PipelineConfig::default(), &mut sink);
        assert!(matches!(
            err,
            Err(PipelineError::ShortWrite {
                written: 10,
                expected: 28
            })
        ));
    }

    #[test]
    fn test_write_pipeline_failure() {
        let err = two_register_sketch().write_pipeline(&PipelineConfig::default(), &mut FailingSink);
        match err {
            Err(PipelineError::Write(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_invalid_source_writes_nothing() {
        let mut sink = Vec::new();
        let err = write_pipeline(&raw_source(2, 4), &PipelineConfig::default(), &mut sink);
        assert!(err.is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_select_mode() {
        let config = PipelineConfig::default();
        assert_eq!(select_mode(&Sketch::<4, 6>::new(), &config), Mode::Explicit);
        assert_eq!(select_mode(&Sketch::<4, 6>::new_dense(), &config), Mode::Dense);
        assert_eq!(
            select_mode(&Sketch::<4, 6>::new(), &config.with_always_write_dense(true)),
            Mode::Dense
        );
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(!config.always_write_dense);
        assert!(!config.write_dirty_encoding);
        assert_eq!(config.max_explicit_registers, 600);
    }
}
