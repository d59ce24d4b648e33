//! Per-block approximate membership over `(locator, key, value)` composites
//! (spec.md §4.4). A thin wrapper so the rest of `block` doesn't depend
//! directly on the `bloomfilter` crate's API shape.

use bloomfilter::Bloom;

use super::BlockError;
use crate::value::Composite;

pub struct BloomFilter(Bloom<Vec<u8>>);

impl BloomFilter {
    /// Size the filter so saturation does not occur at `expected_items`
    /// (spec.md §4.4), targeting `fp_rate` false positives.
    pub fn new(expected_items: usize, fp_rate: f64) -> Result<Self, BlockError> {
        Bloom::new_for_fp_rate(expected_items.max(1), fp_rate)
            .map(Self)
            .map_err(|e| BlockError::Bloom(e.to_string()))
    }

    pub fn insert(&mut self, composite: &Composite) {
        self.0.set(&composite.as_bytes().to_vec());
    }

    /// `false` is definitive; `true` requires consulting the block itself
    /// (spec.md §4.4).
    pub fn might_contain(&self, composite: &Composite) -> bool {
        self.0.check(&composite.as_bytes().to_vec())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_slice().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        Bloom::from_slice(bytes)
            .map(Self)
            .map_err(|e| BlockError::Bloom(e.to_string()))
    }
}
