//! FILENAME: engine/src/selector.rs
//! PURPOSE: Selector functions - pure status computations applied under a
//! combination mode.
//! CONTEXT: This is the DML surface callers (and the aggregation engine) use
//! to drive a dimension's selection: compute a candidate set from the
//! position order or a hierarchy, then combine it with the current status.
//! The candidate set is always computed in full before the status is
//! touched, so a failing selector never leaves a partial selection behind.

use std::collections::HashSet;

use crate::dimension::{Dimension, PositionRef};
use crate::error::EngineError;
use crate::hierarchy::Hierarchy;

/// How a computed candidate set combines with the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Replace the status with the candidate set.
    To,
    /// Union.
    Add,
    /// Subtract.
    Remove,
    /// Intersect.
    Keep,
    /// Ignore the candidate set; select everything not currently selected.
    Complement,
}

/// What to select.
#[derive(Debug, Clone)]
pub enum Selector<'a> {
    /// An explicit list of positions.
    Positions(&'a [PositionRef]),
    /// Every position of the dimension.
    All,
    /// Every position touched by the hierarchy (as child or parent).
    AllInHierarchy(&'a Hierarchy),
    /// The first n positions: of the dimension for To/Add, of the current
    /// status for Remove/Keep.
    First(usize),
    /// The last n positions, same source rules as First.
    Last(usize),
    /// Direct parents of the current status.
    Parents(&'a Hierarchy),
    /// Direct children of the current status.
    Children(&'a Hierarchy),
    /// Closure of Parents, breadth-first.
    Ancestors(&'a Hierarchy),
    /// Closure of Children, breadth-first.
    Descendants(&'a Hierarchy),
    /// Descendants that are not parents of anything: strict leaves.
    LastDescendants(&'a Hierarchy),
}

enum Direction {
    Up,
    Down,
}

/// Applies a selector to a dimension's status under a combination mode.
pub fn limit(dim: &mut Dimension, mode: Mode, selector: Selector<'_>) -> Result<(), EngineError> {
    if mode == Mode::Complement {
        let current: HashSet<String> = dim.status().iter().cloned().collect();
        let complement: Vec<String> = dim
            .position_codes()
            .into_iter()
            .filter(|code| !current.contains(code))
            .collect();
        dim.set_status_codes(complement);
        return Ok(());
    }

    let candidates = compute(dim, mode, &selector)?;
    apply(dim, mode, candidates);
    Ok(())
}

/// Computes the candidate set, in a deterministic order, without touching
/// the status.
fn compute(
    dim: &Dimension,
    mode: Mode,
    selector: &Selector<'_>,
) -> Result<Vec<String>, EngineError> {
    match selector {
        Selector::Positions(refs) => refs.iter().map(|p| dim.resolve(p)).collect(),
        Selector::All => Ok(dim.position_codes()),
        Selector::AllInHierarchy(hier) => {
            check_hierarchy(dim, hier)?;
            Ok(hier.member_codes())
        }
        Selector::First(n) => Ok(slice_source(dim, mode, *n, false)),
        Selector::Last(n) => Ok(slice_source(dim, mode, *n, true)),
        Selector::Parents(hier) => {
            check_hierarchy(dim, hier)?;
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for code in dim.status() {
                if let Some(parent) = hier.parent(code) {
                    if seen.insert(parent.clone()) {
                        out.push(parent);
                    }
                }
            }
            Ok(out)
        }
        Selector::Children(hier) => {
            check_hierarchy(dim, hier)?;
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for code in dim.status() {
                for child in hier.children_of(code) {
                    if seen.insert(child.clone()) {
                        out.push(child);
                    }
                }
            }
            Ok(out)
        }
        Selector::Ancestors(hier) => {
            check_hierarchy(dim, hier)?;
            Ok(closure(dim, hier, Direction::Up))
        }
        Selector::Descendants(hier) => {
            check_hierarchy(dim, hier)?;
            Ok(closure(dim, hier, Direction::Down))
        }
        Selector::LastDescendants(hier) => {
            check_hierarchy(dim, hier)?;
            let parents = hier.parent_codes();
            Ok(closure(dim, hier, Direction::Down)
                .into_iter()
                .filter(|code| !parents.contains(code))
                .collect())
        }
    }
}

fn check_hierarchy(dim: &Dimension, hier: &Hierarchy) -> Result<(), EngineError> {
    if hier.dimension() != dim.code() {
        return Err(EngineError::HierarchyNotFound {
            dimension: dim.code().to_string(),
            code: hier.code().to_string(),
        });
    }
    Ok(())
}

/// First/Last draw from the full position order when selecting into the
/// status (To/Add) and from the current status when narrowing it
/// (Remove/Keep).
fn slice_source(dim: &Dimension, mode: Mode, n: usize, from_end: bool) -> Vec<String> {
    let source: Vec<String> = match mode {
        Mode::Remove | Mode::Keep => dim.status().to_vec(),
        _ => dim.position_codes(),
    };
    let n = n.min(source.len());
    if from_end {
        source[source.len() - n..].to_vec()
    } else {
        source[..n].to_vec()
    }
}

/// Breadth-first closure over the hierarchy, starting from the current
/// status. A discovered position that was already in the original status is
/// collected but not expanded further, so already-selected branches are not
/// re-walked. Termination relies on the links being a forest, which
/// `Hierarchy::set` enforces.
fn closure(dim: &Dimension, hier: &Hierarchy, direction: Direction) -> Vec<String> {
    let original: HashSet<String> = dim.status().iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut result: Vec<String> = Vec::new();
    let mut frontier: Vec<String> = dim.status().to_vec();

    while !frontier.is_empty() {
        let mut discovered: Vec<String> = Vec::new();
        for code in &frontier {
            match direction {
                Direction::Up => {
                    if let Some(parent) = hier.parent(code) {
                        discovered.push(parent);
                    }
                }
                Direction::Down => discovered.extend(hier.children_of(code)),
            }
        }
        frontier.clear();
        for code in discovered {
            if seen.insert(code.clone()) {
                result.push(code.clone());
                if !original.contains(&code) {
                    frontier.push(code);
                }
            }
        }
    }
    result
}

/// Combines the candidate set with the current status.
fn apply(dim: &mut Dimension, mode: Mode, candidates: Vec<String>) {
    match mode {
        Mode::To => dim.set_status_codes(candidates),
        Mode::Add => {
            let mut status = dim.status().to_vec();
            status.extend(candidates);
            dim.set_status_codes(status);
        }
        Mode::Remove => {
            let drop: HashSet<String> = candidates.into_iter().collect();
            let status: Vec<String> = dim
                .status()
                .iter()
                .filter(|code| !drop.contains(*code))
                .cloned()
                .collect();
            dim.set_status_codes(status);
        }
        Mode::Keep => {
            let keep: HashSet<String> = candidates.into_iter().collect();
            let status: Vec<String> = dim
                .status()
                .iter()
                .filter(|code| keep.contains(*code))
                .cloned()
                .collect();
            dim.set_status_codes(status);
        }
        Mode::Complement => unreachable!("complement is handled before computing candidates"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn fixture() -> (Dimension, Hierarchy) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let mut dim = Dimension::new("PROD", "Products", store.clone());
        for code in ["P1", "P2", "P3", "MID", "TOTPROD"] {
            dim.add_position(code, "").unwrap();
        }
        let hier = Hierarchy::new(&dim, "STD", store);
        // P1, P2 -> MID -> TOTPROD ; P3 -> TOTPROD
        hier.set("P1", "MID").unwrap();
        hier.set("P2", "MID").unwrap();
        hier.set("MID", "TOTPROD").unwrap();
        hier.set("P3", "TOTPROD").unwrap();
        (dim, hier)
    }

    #[test]
    fn test_to_and_add() {
        let (mut dim, _) = fixture();
        limit(&mut dim, Mode::To, Selector::Positions(&["P1".into()])).unwrap();
        assert_eq!(dim.status(), &["P1"]);
        limit(&mut dim, Mode::Add, Selector::Positions(&["P2".into()])).unwrap();
        assert_eq!(dim.status(), &["P1", "P2"]);
    }

    #[test]
    fn test_complement_scenario() {
        // status {P1} over {P1,P2,P3,MID,TOTPROD} -> {P2,P3,MID,TOTPROD}
        let (mut dim, _) = fixture();
        limit(&mut dim, Mode::To, Selector::Positions(&["P1".into()])).unwrap();
        limit(&mut dim, Mode::Complement, Selector::All).unwrap();
        assert_eq!(dim.status(), &["P2", "P3", "MID", "TOTPROD"]);
    }

    #[test]
    fn test_first_and_last_draw_from_dimension_for_to() {
        let (mut dim, _) = fixture();
        limit(&mut dim, Mode::To, Selector::First(2)).unwrap();
        assert_eq!(dim.status(), &["P1", "P2"]);
        limit(&mut dim, Mode::To, Selector::Last(2)).unwrap();
        assert_eq!(dim.status(), &["MID", "TOTPROD"]);
    }

    #[test]
    fn test_first_draws_from_status_for_keep_and_remove() {
        let (mut dim, _) = fixture();
        limit(
            &mut dim,
            Mode::To,
            Selector::Positions(&["P3".into(), "P1".into(), "P2".into()]),
        )
        .unwrap();
        limit(&mut dim, Mode::Keep, Selector::First(2)).unwrap();
        assert_eq!(dim.status(), &["P3", "P1"]);
        limit(&mut dim, Mode::Remove, Selector::First(1)).unwrap();
        assert_eq!(dim.status(), &["P1"]);
    }

    #[test]
    fn test_first_clamps_to_available() {
        let (mut dim, _) = fixture();
        limit(&mut dim, Mode::To, Selector::First(99)).unwrap();
        assert_eq!(dim.status_len(), dim.position_count());
    }

    #[test]
    fn test_parents_and_children() {
        let (mut dim, hier) = fixture();
        limit(&mut dim, Mode::To, Selector::Positions(&["P1".into(), "P3".into()])).unwrap();
        limit(&mut dim, Mode::To, Selector::Parents(&hier)).unwrap();
        assert_eq!(dim.status(), &["MID", "TOTPROD"]);
        limit(&mut dim, Mode::To, Selector::Children(&hier)).unwrap();
        // children of MID and TOTPROD
        assert_eq!(dim.status(), &["P1", "P2", "MID", "P3"]);
    }

    #[test]
    fn test_ancestors_closure() {
        let (mut dim, hier) = fixture();
        limit(&mut dim, Mode::To, Selector::Positions(&["P1".into()])).unwrap();
        limit(&mut dim, Mode::To, Selector::Ancestors(&hier)).unwrap();
        assert_eq!(dim.status(), &["MID", "TOTPROD"]);
    }

    #[test]
    fn test_descendants_closure() {
        let (mut dim, hier) = fixture();
        limit(&mut dim, Mode::To, Selector::Positions(&["TOTPROD".into()])).unwrap();
        limit(&mut dim, Mode::To, Selector::Descendants(&hier)).unwrap();
        let status: HashSet<&String> = dim.status().iter().collect();
        assert_eq!(status.len(), 4);
        assert!(!status.contains(&"TOTPROD".to_string()));
    }

    #[test]
    fn test_ancestors_descendants_are_inverse_on_trees() {
        let (mut dim, hier) = fixture();
        // MID is an ancestor of P1, so P1 is a descendant of MID
        limit(&mut dim, Mode::To, Selector::Positions(&["P1".into()])).unwrap();
        limit(&mut dim, Mode::To, Selector::Ancestors(&hier)).unwrap();
        assert!(dim.status().contains(&"MID".to_string()));

        limit(&mut dim, Mode::To, Selector::Positions(&["MID".into()])).unwrap();
        limit(&mut dim, Mode::To, Selector::Descendants(&hier)).unwrap();
        assert!(dim.status().contains(&"P1".to_string()));
    }

    #[test]
    fn test_last_descendants_are_strict_leaves() {
        let (mut dim, hier) = fixture();
        limit(&mut dim, Mode::To, Selector::Positions(&["TOTPROD".into()])).unwrap();
        limit(&mut dim, Mode::To, Selector::LastDescendants(&hier)).unwrap();
        let mut status = dim.status().to_vec();
        status.sort();
        assert_eq!(status, vec!["P1", "P2", "P3"]);
    }

    #[test]
    fn test_foreign_hierarchy_is_rejected() {
        let (mut dim, _) = fixture();
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let other_dim = Dimension::new("GEOG", "Geography", store.clone());
        let foreign = Hierarchy::new(&other_dim, "STD", store);
        let before = dim.status().to_vec();
        let err = limit(&mut dim, Mode::To, Selector::Parents(&foreign));
        assert!(matches!(err, Err(EngineError::HierarchyNotFound { .. })));
        assert_eq!(dim.status(), &before[..]);
    }

    #[test]
    fn test_all_in_hierarchy() {
        let (mut dim, hier) = fixture();
        dim.status_clear();
        limit(&mut dim, Mode::To, Selector::AllInHierarchy(&hier)).unwrap();
        assert_eq!(dim.status_len(), 5);
    }

    #[test]
    fn test_remove_via_selector() {
        let (mut dim, hier) = fixture();
        dim.status_all();
        // remove everything below TOTPROD except the leaves' parents
        limit(&mut dim, Mode::To, Selector::Positions(&["TOTPROD".into()])).unwrap();
        limit(&mut dim, Mode::Add, Selector::Descendants(&hier)).unwrap();
        limit(&mut dim, Mode::Remove, Selector::LastDescendants(&hier)).unwrap();
        let mut status = dim.status().to_vec();
        status.sort();
        assert_eq!(status, vec!["MID", "TOTPROD"]);
    }
}
