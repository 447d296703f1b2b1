//! ## Dense payload
//! PipelineDB stores dense registers as a 6-bit array packed least significant bit first,
//! with registers spanning byte boundaries. Register `r` starts at bit `r * 6`.
//!
//! The payload is `1 + M * 6 / 8` bytes long: the trailing byte lets the last register update
//! touch two bytes like every other register does.

use bytes::BytesMut;

use crate::error::PipelineError;
use crate::registers::RegisterIter;

/// Number of bits per PipelineDB register
pub(crate) const BITS_PER_REGISTER: u32 = 6;
/// Maximum register value
pub(crate) const REGISTER_MAX: u32 = (1 << BITS_PER_REGISTER) - 1;

/// Return dense payload length for `m` registers
#[inline]
pub(crate) fn payload_len(m: u32) -> usize {
    1 + (m as usize * BITS_PER_REGISTER as usize).div_ceil(8)
}

/// Append zeroed dense payload for `m` registers to `out` and fill it from `registers`.
///
/// A non-zero register written twice is reported as a duplicate.
pub(crate) fn write_payload(
    out: &mut BytesMut,
    registers: RegisterIter<'_>,
    m: u32,
) -> Result<(), PipelineError> {
    let start = out.len();
    out.resize(start + payload_len(m), 0);
    let data = &mut out[start..];
    for r in registers {
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
        if r.value == 0 {
            continue;
        }
        if get_register(data, r.index) != 0 {
            return Err(PipelineError::DuplicateRegister { index: r.index });
        }
        set_register(data, r.index, r.value);
    }
    Ok(())
}

/// Set `regnum` register of PipelineDB dense array to `val`
#[inline]
pub(crate) fn set_register(data: &mut [u8], regnum: u32, val: u8) {
    let bit_idx = regnum * BITS_PER_REGISTER;
    let byte = (bit_idx / 8) as usize;
    let fb = bit_idx & 7;
    let fb8 = 8 - fb;
    let v = u32::from(val);

    data[byte] &= !(REGISTER_MAX << fb) as u8;
    data[byte] |= (v << fb) as u8;
    data[byte + 1] &= !(REGISTER_MAX >> fb8) as u8;
    data[byte + 1] |= (v >> fb8) as u8;
}

/// Get `regnum` register of PipelineDB dense array
#[inline]
pub(crate) fn get_register(data: &[u8], regnum: u32) -> u8 {
    let bit_idx = regnum * BITS_PER_REGISTER;
    let byte = (bit_idx / 8) as usize;
    let fb = bit_idx & 7;
    let fb8 = 8 - fb;
    let lo = u32::from(data[byte]) >> fb;
    let hi = u32::from(data[byte + 1]) << fb8;
    ((lo | hi) & REGISTER_MAX) as u8
}
