//! ## Explicit payload
//! Sorted list of non-zero registers, each packed into a little endian `u32` word as
//! `(index << 8) | value`. The low byte holds the register value and the upper 24 bits hold
//! the index, which covers every index up to precision 18.
//!
//! Values are held to the same 6-bit limit as DENSE registers, so a source is valid or invalid
//! regardless of which payload it ends up in.
//!
//! PipelineDB only keeps a bounded number of registers in EXPLICIT form, so collection stops as
//! soon as the configured limit is exceeded and the caller writes a dense payload instead.

use bytes::{BufMut, BytesMut};

use crate::dense::REGISTER_MAX;
use crate::error::PipelineError;
use crate::registers::{Register, RegisterCursor, RegisterIter};

/// Size of a single explicit register word in bytes
pub(crate) const WORD_LEN: usize = 4;

/// Outcome of collecting explicit registers
#[derive(Debug, PartialEq)]
pub(crate) enum Explicit {
    /// Registers sorted by index
    Registers(Vec<Register>),
    /// More than the allowed number of registers were found
    Overflow,
}

/// Collect registers into a sorted list, giving up once more than `max_registers` are seen.
///
/// Registers must be in range, fit into 6 bits and appear at most once.
pub(crate) fn collect(
    mut registers: RegisterIter<'_>,
    m: u32,
    max_registers: usize,
) -> Result<Explicit, PipelineError> {
    let mut collected =
        Vec::with_capacity(registers.remaining().min(max_registers.saturating_add(1)));
    while let Some(r) = registers.next_register() {
        if r.index >= m {
            return Err(PipelineError::RegisterIndexOutOfRange {
                index: r.index,
                register_count: m,
            });
        }
        if u32::from(r.value) > REGISTER_MAX {
            return Err(PipelineError::RegisterValueOverflow {
                index: r.index,
                value: r.value,
            });
        }
        collected.push(r);
        if collected.len() > max_registers {
            return Ok(Explicit::Overflow);
        }
    }

    collected.sort_unstable_by_key(|r| r.index);
    if let Some(w) = collected.windows(2).find(|w| w[0].index == w[1].index) {
        return Err(PipelineError::DuplicateRegister { index: w[0].index });
    }
    Ok(Explicit::Registers(collected))
}

/// Return explicit payload length for `n` registers
#[inline]
pub(crate) fn payload_len(n: usize) -> usize {
    n * WORD_LEN
}

/// Append explicit payload words to `out`
pub(crate) fn write_payload(out: &mut BytesMut, registers: &[Register]) {
    for r in registers {
        out.put_u32_le(pack(r));
    }
}

/// Pack register into explicit word.
///
/// `collect` keeps values within 6 bits, the mask only guards the index bits.
#[inline]
pub(crate) fn pack(r: &Register) -> u32 {
    (r.index << 8) | (u32::from(r.value) & 0xff)
}
