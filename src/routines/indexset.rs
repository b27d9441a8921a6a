use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::MimcError;
use crate::structs::multi_index::MultiIndex;

/// The active set of multi-indices
///
/// The set only grows. Every active index has all of its predecessors active, except for
/// indices that were explicitly fixed with [IndexSet::fix].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSet {
    dim: usize,
    max_level: u32,
    active: BTreeSet<MultiIndex>,
    fixed: BTreeSet<MultiIndex>,
}

impl IndexSet {
    pub fn new(dim: usize, max_level: u32) -> Self {
        IndexSet {
            dim,
            max_level,
            active: BTreeSet::new(),
            fixed: BTreeSet::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, index: &MultiIndex) -> bool {
        self.active.contains(index)
    }

    pub fn is_fixed(&self, index: &MultiIndex) -> bool {
        self.fixed.contains(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MultiIndex> {
        self.active.iter()
    }

    /// Predecessors of `index` that are not active
    pub fn missing_predecessors(&self, index: &MultiIndex) -> Vec<MultiIndex> {
        index
            .predecessors()
            .map(|(_, p)| p)
            .filter(|p| !self.active.contains(p))
            .collect()
    }

    /// Whether every non-fixed active index has all of its predecessors active
    pub fn is_admissible(&self) -> bool {
        self.active
            .iter()
            .filter(|index| !self.fixed.contains(*index))
            .all(|index| self.missing_predecessors(index).is_empty())
    }

    /// Indices that may be activated next, excluding those beyond the maximum level
    pub fn frontier(&self) -> Vec<MultiIndex> {
        self.boundary()
            .into_iter()
            .filter(|index| index.coords().iter().all(|&c| c <= self.max_level))
            .collect()
    }

    /// All inactive indices whose predecessors are active, regardless of the maximum level
    ///
    /// An empty set has the zero index as its only boundary element.
    pub fn boundary(&self) -> Vec<MultiIndex> {
        if self.active.is_empty() {
            return vec![MultiIndex::zero(self.dim)];
        }
        let candidates: BTreeSet<MultiIndex> = self
            .active
            .iter()
            .flat_map(|index| index.successors().map(|(_, s)| s).collect::<Vec<_>>())
            .filter(|s| !self.active.contains(s))
            .collect();
        candidates
            .into_iter()
            .filter(|c| self.missing_predecessors(c).is_empty())
            .collect()
    }

    fn check_dimension(&self, index: &MultiIndex) -> Result<(), MimcError> {
        if index.dim() != self.dim {
            return Err(MimcError::DimensionMismatch {
                expected: self.dim,
                found: index.dim(),
            });
        }
        Ok(())
    }

    /// Activate an index, returning whether it was newly added
    ///
    /// Fails with [MimcError::InadmissibleIndex] if a predecessor is missing and the index has
    /// not been fixed.
    pub fn activate(&mut self, index: &MultiIndex) -> Result<bool, MimcError> {
        self.check_dimension(index)?;
        if self.active.contains(index) {
            return Ok(false);
        }
        let missing = self.missing_predecessors(index);
        if !missing.is_empty() && !self.fixed.contains(index) {
            return Err(MimcError::InadmissibleIndex {
                index: index.clone(),
                missing,
            });
        }
        self.active.insert(index.clone());
        Ok(true)
    }

    /// Mark an index as fixed and activate it without checking its predecessors
    pub fn fix(&mut self, index: &MultiIndex) -> Result<bool, MimcError> {
        self.check_dimension(index)?;
        self.fixed.insert(index.clone());
        Ok(self.active.insert(index.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(coords: &[u32]) -> MultiIndex {
        MultiIndex::new(coords.to_vec())
    }

    #[test]
    fn test_empty_set_frontier_is_zero() {
        let set = IndexSet::new(3, 5);
        assert_eq!(set.frontier(), vec![MultiIndex::zero(3)]);
    }

    #[test]
    fn test_frontier_of_staircase() {
        let mut set = IndexSet::new(2, 5);
        for coords in [[0, 0], [1, 0], [0, 1], [2, 0]] {
            set.activate(&idx(&coords)).unwrap();
        }
        assert_eq!(set.frontier(), vec![idx(&[0, 2]), idx(&[1, 1]), idx(&[3, 0])]);
    }

    #[test]
    fn test_frontier_respects_max_level() {
        let mut set = IndexSet::new(1, 1);
        set.activate(&idx(&[0])).unwrap();
        set.activate(&idx(&[1])).unwrap();
        assert!(set.frontier().is_empty());
        assert_eq!(set.boundary(), vec![idx(&[2])]);
    }

    #[test]
    fn test_activate_rejects_missing_predecessor() {
        let mut set = IndexSet::new(2, 5);
        set.activate(&idx(&[0, 0])).unwrap();
        set.activate(&idx(&[1, 0])).unwrap();
        match set.activate(&idx(&[1, 1])) {
            Err(MimcError::InadmissibleIndex { missing, .. }) => {
                assert_eq!(missing, vec![idx(&[0, 1])])
            }
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(set.is_admissible());
    }

    #[test]
    fn test_fixed_index_bypasses_admissibility() {
        let mut set = IndexSet::new(2, 5);
        set.fix(&idx(&[3, 2])).unwrap();
        assert!(set.contains(&idx(&[3, 2])));
        assert!(set.is_admissible());
        assert!(!set.activate(&idx(&[3, 2])).unwrap());
    }

    #[test]
    fn test_dimension_is_checked() {
        let mut set = IndexSet::new(2, 5);
        assert_eq!(
            set.activate(&idx(&[0])),
            Err(MimcError::DimensionMismatch {
                expected: 2,
                found: 1
            })
        );
    }
}
