//! # Serde module for Sketch
//!
//! `Sketch` is serialized as a tuple `(count, sparse, Vec<u32>)`, where the vector holds either
//! sorted sparse entries or dense register words depending on the `sparse` flag.
//!
//! Deserialization validates the vector against the sketch parameters, so a snapshot read back
//! from storage can be converted to PipelineDB HLL without re-checking its registers.
use serde::de::Error;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize};

use crate::estimator::{Representation, Sketch};

/// Sketch representation error
#[derive(Debug)]
pub(crate) enum RepresentationError {
    SparseRepresentationInvalid,
    DenseRepresentationInvalid,
}

impl<const P: usize, const W: usize> Sketch<P, W> {
    /// Create sketch from serialized parts
    fn try_from_parts(count: u64, sparse: bool, data: Vec<u32>) -> Result<Self, RepresentationError> {
        let representation = if sparse {
            let mut prev = None;
            for &h in &data {
                let idx = h >> W;
                let valid_idx = (idx as usize) < Self::M && prev.map_or(true, |p| p < idx);
                if !valid_idx || h & ((1 << W) - 1) == 0 {
                    return Err(RepresentationError::SparseRepresentationInvalid);
                }
                prev = Some(idx);
            }
            Representation::Sparse(data)
        } else {
            if data.len() != Self::DENSE_LEN {
                return Err(RepresentationError::DenseRepresentationInvalid);
            }
            Representation::Dense(data)
        };
        Ok(Self {
            count,
            representation,
        })
    }
}

impl<const P: usize, const W: usize> Serialize for Sketch<P, W> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut tup = serializer.serialize_tuple(3)?;
        tup.serialize_element(&self.count)?;
        match &self.representation {
            Representation::Sparse(entries) => {
                tup.serialize_element(&true)?;
                tup.serialize_element(entries)?;
            }
            Representation::Dense(data) => {
                tup.serialize_element(&false)?;
                tup.serialize_element(data)?;
            }
        }
        tup.end()
    }
}

impl<'de, const P: usize, const W: usize> Deserialize<'de> for Sketch<P, W> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (count, sparse, data): (u64, bool, Vec<u32>) = Deserialize::deserialize(deserializer)?;
        Sketch::try_from_parts(count, sparse, data).map_err(|e| Error::custom(format!("{:?}", e)))
    }
}
