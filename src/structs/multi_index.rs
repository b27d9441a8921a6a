use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A multi-index, one non-negative level per discretization dimension
///
/// Multi-indices are ordered lexicographically so they can be used as keys in ordered maps,
/// but the ordering relevant for admissibility is the coordinate-wise partial order, see
/// [MultiIndex::is_below].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MultiIndex(Vec<u32>);

impl MultiIndex {
    pub fn new(coords: Vec<u32>) -> Self {
        MultiIndex(coords)
    }

    /// The minimal index of dimension `dim`
    pub fn zero(dim: usize) -> Self {
        MultiIndex(vec![0; dim])
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn coords(&self) -> &[u32] {
        &self.0
    }

    pub fn get(&self, direction: usize) -> u32 {
        self.0[direction]
    }

    /// Sum of all coordinates
    pub fn sum(&self) -> u64 {
        self.0.iter().map(|&c| c as u64).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    /// Coordinate-wise `self <= other`
    pub fn is_below(&self, other: &MultiIndex) -> bool {
        self.dim() == other.dim() && self.0.iter().zip(&other.0).all(|(a, b)| a <= b)
    }

    /// The index with coordinate `direction` increased by one
    pub fn increment(&self, direction: usize) -> MultiIndex {
        let mut coords = self.0.clone();
        coords[direction] += 1;
        MultiIndex(coords)
    }

    /// The index with coordinate `direction` decreased by one, if it is positive
    pub fn decrement(&self, direction: usize) -> Option<MultiIndex> {
        if self.0[direction] == 0 {
            return None;
        }
        let mut coords = self.0.clone();
        coords[direction] -= 1;
        Some(MultiIndex(coords))
    }

    /// All indices obtained by decrementing a single positive coordinate
    pub fn predecessors(&self) -> impl Iterator<Item = (usize, MultiIndex)> + '_ {
        (0..self.dim()).filter_map(move |d| self.decrement(d).map(|p| (d, p)))
    }

    /// All indices obtained by incrementing a single coordinate
    pub fn successors(&self) -> impl Iterator<Item = (usize, MultiIndex)> + '_ {
        (0..self.dim()).map(move |d| (d, self.increment(d)))
    }

    /// The index with coordinate `direction` removed
    ///
    /// Indices sharing the same projection lie on one line along `direction`.
    pub fn without(&self, direction: usize) -> Vec<u32> {
        self.0
            .iter()
            .enumerate()
            .filter(|(d, _)| *d != direction)
            .map(|(_, &c)| c)
            .collect()
    }

    /// Signed stencil of the mixed difference restricted to the directions in `mask`
    ///
    /// For every subset `S` of the masked directions with a positive coordinate, the stencil
    /// holds `(-1)^|S|` and `self - e_S`. The first entry is always `(1, self)`.
    pub fn stencil(&self, mask: &[bool]) -> Vec<(f64, MultiIndex)> {
        let directions: Vec<usize> = (0..self.dim())
            .filter(|&d| mask.get(d).copied().unwrap_or(false) && self.0[d] > 0)
            .collect();

        let mut stencil = Vec::with_capacity(1 << directions.len());
        for subset in 0..(1usize << directions.len()) {
            let mut coords = self.0.clone();
            let mut sign = 1.0;
            for (bit, &d) in directions.iter().enumerate() {
                if subset & (1 << bit) != 0 {
                    coords[d] -= 1;
                    sign = -sign;
                }
            }
            stencil.push((sign, MultiIndex(coords)));
        }
        stencil
    }

    /// Stencil of the full mixed difference in every direction
    pub fn full_stencil(&self) -> Vec<(f64, MultiIndex)> {
        self.stencil(&vec![true; self.dim()])
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

impl FromStr for MultiIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| format!("Multi-index '{}' must be enclosed in parentheses", s))?;

        if inner.trim().is_empty() {
            return Ok(MultiIndex(Vec::new()));
        }

        inner
            .split(',')
            .map(|c| {
                c.trim()
                    .parse::<u32>()
                    .map_err(|e| format!("Invalid coordinate '{}' in '{}': {}", c, s, e))
            })
            .collect::<Result<Vec<u32>, String>>()
            .map(MultiIndex)
    }
}

impl From<Vec<u32>> for MultiIndex {
    fn from(coords: Vec<u32>) -> Self {
        MultiIndex(coords)
    }
}

// Serialized as its display string so it can be used as a JSON map key
impl Serialize for MultiIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MultiIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
