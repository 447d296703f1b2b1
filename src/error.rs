//! Errors returned while converting a sketch into PipelineDB representation.

use std::io;

use thiserror::Error;

/// Pipeline conversion error
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("precision {0} is outside of supported [4..18] range")]
    InvalidPrecision(u8),
    #[error("register count {register_count} does not match precision {precision}")]
    RegisterCountMismatch { precision: u8, register_count: u32 },
    #[error("register width {0} is outside of supported [1..8] range")]
    InvalidRegisterWidth(usize),
    #[error("sparse cursor precision {cursor_precision} does not match precision {precision}")]
    SparsePrecisionMismatch { precision: u8, cursor_precision: u8 },
    #[error("register index {index} is out of range for {register_count} registers")]
    RegisterIndexOutOfRange { index: u32, register_count: u32 },
    #[error("register {index} value {value} does not fit into 6 bits")]
    RegisterValueOverflow { index: u32, value: u8 },
    #[error("register {index} appears more than once")]
    DuplicateRegister { index: u32 },
    #[error("failed to write pipeline hll: {0}")]
    Write(#[from] io::Error),
    #[error("short pipeline hll write {written} != {expected}")]
    ShortWrite { written: usize, expected: usize },
}
