//! FILENAME: rollup-engine/src/order.rs
//! PURPOSE: Hierarchy traversal indexing and status ordering.
//! CONTEXT: check_hier walks a hierarchy top-down and stamps every reachable
//! position with its traversal index. The index gives reports a stable
//! drill-down order: sort_hierarchical reorders a status so parents precede
//! their children, the way the hierarchy reads on screen.

use std::collections::VecDeque;

use log::info;
use rustc_hash::FxHashSet;

use engine::{Dimension, EngineError, Hierarchy, PositionRef};

/// Walks the hierarchy breadth-first from its roots and records a traversal
/// index per position, both in memory and in the store. A whole level is
/// indexed before any of its children, so positions of equal depth stay
/// adjacent. Returns the number of positions indexed. Positions outside the
/// hierarchy are left unstamped.
pub fn check_hier(hier: &Hierarchy) -> Result<u64, EngineError> {
    let mut next_index: u64 = 0;
    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut frontier: VecDeque<String> = hier.roots().into();
    while let Some(code) = frontier.pop_front() {
        if !visited.insert(code.clone()) {
            continue;
        }
        hier.record_order_index(&code, next_index)?;
        next_index += 1;
        frontier.extend(hier.children_of(&code));
    }
    info!(
        "[{}.{}] indexed {} positions",
        hier.dimension(),
        hier.code(),
        next_index
    );
    Ok(next_index)
}

/// Reorders the status along the hierarchy's traversal indexes. Positions
/// the hierarchy never indexed sort to the back, keeping their relative
/// order.
pub fn sort_hierarchical(dim: &mut Dimension, hier: &Hierarchy) -> Result<(), EngineError> {
    let mut status = dim.status().to_vec();
    status.sort_by_key(|code| hier.order_index(code).unwrap_or(u64::MAX));
    let refs: Vec<PositionRef> = status.into_iter().map(PositionRef::from).collect();
    dim.status_set(&refs)
}

/// Reorders the status alphabetically by position code.
pub fn sort_alphabetical(dim: &mut Dimension) -> Result<(), EngineError> {
    let mut status = dim.status().to_vec();
    status.sort();
    let refs: Vec<PositionRef> = status.into_iter().map(PositionRef::from).collect();
    dim.status_set(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Catalog, MemoryStore};
    use std::sync::Arc;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new(Arc::new(MemoryStore::new()));
        catalog.create_dimension("PROD", "").unwrap();
        for code in ["P1", "P2", "P3", "MID", "TOTPROD"] {
            catalog.add_position("PROD", code, "").unwrap();
        }
        catalog.create_hierarchy("PROD", "STD").unwrap();
        let hier = catalog.hierarchy("PROD", "STD").unwrap();
        hier.set("P1", "MID").unwrap();
        hier.set("P2", "MID").unwrap();
        hier.set("MID", "TOTPROD").unwrap();
        hier.set("P3", "TOTPROD").unwrap();
        catalog
    }

    #[test]
    fn test_check_hier_indexes_top_down() {
        let catalog = catalog();
        let hier = catalog.hierarchy("PROD", "STD").unwrap();
        assert_eq!(check_hier(hier).unwrap(), 5);
        // the root comes first, every parent before its children
        assert_eq!(hier.order_index("TOTPROD"), Some(0));
        assert!(hier.order_index("MID").unwrap() < hier.order_index("P1").unwrap());
        assert!(hier.order_index("MID").unwrap() < hier.order_index("P2").unwrap());
    }

    #[test]
    fn test_check_hier_indexes_whole_levels_before_descending() {
        let catalog = catalog();
        let hier = catalog.hierarchy("PROD", "STD").unwrap();
        check_hier(hier).unwrap();
        // P3 sits directly under the root, so it indexes with MID's level,
        // ahead of MID's own children
        assert_eq!(hier.order_index("MID"), Some(1));
        assert_eq!(hier.order_index("P3"), Some(2));
        assert_eq!(hier.order_index("P1"), Some(3));
        assert_eq!(hier.order_index("P2"), Some(4));
    }

    #[test]
    fn test_sort_hierarchical() {
        let mut catalog = catalog();
        let hier = catalog.hierarchy("PROD", "STD").unwrap().clone();
        check_hier(&hier).unwrap();
        let dim = catalog.dimension_mut("PROD").unwrap();
        dim.status_all();
        sort_hierarchical(dim, &hier).unwrap();
        assert_eq!(dim.status(), &["TOTPROD", "MID", "P3", "P1", "P2"]);
    }

    #[test]
    fn test_sort_hierarchical_unindexed_sort_last() {
        let mut catalog = catalog();
        catalog.add_position("PROD", "LOOSE", "").unwrap();
        let hier = catalog.hierarchy("PROD", "STD").unwrap().clone();
        check_hier(&hier).unwrap();
        let dim = catalog.dimension_mut("PROD").unwrap();
        dim.status_all();
        sort_hierarchical(dim, &hier).unwrap();
        assert_eq!(dim.status().last().map(String::as_str), Some("LOOSE"));
    }

    #[test]
    fn test_sort_alphabetical() {
        let mut catalog = catalog();
        let dim = catalog.dimension_mut("PROD").unwrap();
        dim.status_set(&["P2".into(), "MID".into(), "P1".into()]).unwrap();
        sort_alphabetical(dim).unwrap();
        assert_eq!(dim.status(), &["MID", "P1", "P2"]);
    }
}
