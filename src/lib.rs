//! `pipeline-hll` encodes HyperLogLog++ sketches into the padded binary layout PipelineDB uses to persist
//! its `hll` type, so sketches built elsewhere can be loaded straight into PipelineDB tables.
//!
//! Sketches backed by a sparse representation are written as sorted EXPLICIT register lists while they stay
//! small, and everything else is written as a 6-bit DENSE register array. See [`pipeline`] for the wire format.
mod dense;
pub mod error;
pub mod estimator;
mod explicit;
pub mod pipeline;
pub mod preamble;
pub mod registers;
#[cfg(feature = "with_serde")]
mod serde;

pub use error::PipelineError;
pub use estimator::{PipelineSource, Sketch};
pub use pipeline::{AsPipeline, PipelineConfig};
pub use preamble::{Encoding, Preamble};
pub use registers::{DenseRegisters, Register, RegisterCursor, RegisterIter, SparseRegisters};
