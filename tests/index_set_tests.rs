use mimcore::prelude::*;
use rand::prelude::*;
use rand_pcg::Pcg64;

/// Test that growing a set from its frontier keeps it admissible
#[test]
fn test_frontier_growth_stays_admissible() {
    let mut rng = Pcg64::seed_from_u64(5);
    let mut set = IndexSet::new(3, 4);
    set.activate(&MultiIndex::zero(3)).unwrap();

    for _ in 0..40 {
        let frontier = set.frontier();
        if frontier.is_empty() {
            break;
        }
        let candidate = frontier.choose(&mut rng).unwrap().clone();
        assert!(set.missing_predecessors(&candidate).is_empty());
        assert!(set.activate(&candidate).unwrap());
        assert!(set.is_admissible());
    }
    assert!(set.iter().all(|index| index.coords().iter().all(|&c| c <= 4)));
}

/// Test that the frontier is exhausted once every index up to the maximum level is active
#[test]
fn test_frontier_exhausted_at_max_level() {
    let mut set = IndexSet::new(2, 1);
    for coords in [[0, 0], [1, 0], [0, 1], [1, 1]] {
        set.activate(&MultiIndex::new(coords.to_vec())).unwrap();
    }
    assert!(set.frontier().is_empty());

    // The boundary ignores the maximum level
    let boundary = set.boundary();
    assert_eq!(
        boundary,
        vec![MultiIndex::new(vec![0, 2]), MultiIndex::new(vec![2, 0])]
    );
}

/// Test that inadmissible activation is reported with the missing predecessors
#[test]
fn test_inadmissible_activation() {
    let mut set = IndexSet::new(2, 5);
    set.activate(&MultiIndex::zero(2)).unwrap();
    set.activate(&MultiIndex::new(vec![1, 0])).unwrap();

    let error = set.activate(&MultiIndex::new(vec![1, 1])).unwrap_err();
    assert!(error.is_fatal());
    assert_eq!(
        error,
        MimcError::InadmissibleIndex {
            index: MultiIndex::new(vec![1, 1]),
            missing: vec![MultiIndex::new(vec![0, 1])],
        }
    );
    assert_eq!(set.len(), 2);
}

/// Test that fixed indices are exempt from admissibility
#[test]
fn test_fixed_indices_are_exempt() {
    let mut set = IndexSet::new(2, 5);
    set.activate(&MultiIndex::zero(2)).unwrap();
    set.fix(&MultiIndex::new(vec![3, 0])).unwrap();

    assert!(set.is_fixed(&MultiIndex::new(vec![3, 0])));
    assert!(set.is_admissible());
    // Successors of a fixed index still need all of their predecessors
    assert!(set.activate(&MultiIndex::new(vec![3, 1])).is_err());
    assert!(set.frontier().contains(&MultiIndex::new(vec![4, 0])));
}
