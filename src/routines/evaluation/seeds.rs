use rand::RngCore;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::structs::multi_index::MultiIndex;

/// Reproducible stream of evaluation seeds
///
/// The `k`-th seed of an index only depends on the root seed, the index and `k`, so results do
/// not depend on the number of threads or on the order in which evaluations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSequence {
    root: u64,
}

impl SeedSequence {
    pub fn new(root: u64) -> Self {
        SeedSequence { root }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// The `k`-th seed drawn for `index`
    pub fn seed(&self, index: &MultiIndex, k: u64) -> u64 {
        let state = ((self.root as u128) << 64) | index_key(index) as u128;
        let stream = ((k as u128) << 1) | 1;
        Pcg64::new(state, stream).next_u64()
    }
}

// splitmix64 finalizer folded over the coordinates
fn index_key(index: &MultiIndex) -> u64 {
    let mut key: u64 = 0x9E37_79B9_7F4A_7C15 ^ index.dim() as u64;
    for &c in index.coords() {
        key = key.wrapping_add(c as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
        key = (key ^ (key >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        key = (key ^ (key >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        key ^= key >> 31;
    }
    key
}
