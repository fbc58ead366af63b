//! FILENAME: engine/src/dimension.rs
//! PURPOSE: Dimensions, positions and the status (current selection) algebra.
//! CONTEXT: A dimension owns an insertion-ordered set of positions and a
//! mutable status list. Position data lives behind a shared handle: cloning
//! a Dimension gives a worker its own independent status over the same
//! position set, which is what allows concurrent aggregations to drive their
//! own selections without perturbing each other.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::EngineError;
use crate::store::{PositionRecord, Store};

/// One addressable member of a dimension.
/// Identity is the (dimension, code) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub dimension: String,
    pub code: String,
    pub description: String,
}

/// A position argument at the API boundary: either a raw code or an already
/// resolved handle. Resolved exactly once by `Dimension::resolve`.
#[derive(Debug, Clone)]
pub enum PositionRef {
    Code(String),
    Handle(Position),
}

impl From<&str> for PositionRef {
    fn from(code: &str) -> Self {
        PositionRef::Code(code.to_string())
    }
}

impl From<String> for PositionRef {
    fn from(code: String) -> Self {
        PositionRef::Code(code)
    }
}

impl From<Position> for PositionRef {
    fn from(position: Position) -> Self {
        PositionRef::Handle(position)
    }
}

/// Insertion-ordered position set, shared by every clone of the dimension.
#[derive(Debug, Default)]
pub(crate) struct PositionData {
    pub(crate) order: Vec<String>,
    pub(crate) by_code: std::collections::HashMap<String, Position>,
}

/// Named axis of analysis owning positions and a current selection.
#[derive(Clone)]
pub struct Dimension {
    code: String,
    description: String,
    positions: Arc<RwLock<PositionData>>,
    status: Vec<String>,
    store: Arc<dyn Store>,
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dimension")
            .field("code", &self.code)
            .field("status", &self.status)
            .finish()
    }
}

impl Dimension {
    pub(crate) fn new(code: &str, description: &str, store: Arc<dyn Store>) -> Self {
        Dimension {
            code: code.to_uppercase(),
            description: description.to_string(),
            positions: Arc::new(RwLock::new(PositionData::default())),
            status: Vec::new(),
            store,
        }
    }

    /// Rebuilds a dimension from persisted position records.
    pub(crate) fn from_records(
        code: &str,
        description: &str,
        records: Vec<PositionRecord>,
        store: Arc<dyn Store>,
    ) -> Self {
        let dim = Dimension::new(code, description, store);
        {
            let mut data = dim.positions.write().expect("position lock poisoned");
            for record in records {
                data.order.push(record.code.clone());
                data.by_code.insert(
                    record.code.clone(),
                    Position {
                        dimension: dim.code.clone(),
                        code: record.code,
                        description: record.description,
                    },
                );
            }
        }
        dim
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn position_data(&self) -> Arc<RwLock<PositionData>> {
        Arc::clone(&self.positions)
    }

    // ========================================================================
    // POSITIONS
    // ========================================================================

    /// Adds a new position. The position is persisted and joins the current
    /// status. Visible to every clone of this dimension.
    pub fn add_position(&mut self, code: &str, description: &str) -> Result<Position, EngineError> {
        let position = {
            let mut data = self.positions.write().expect("position lock poisoned");
            if data.by_code.contains_key(code) {
                return Err(EngineError::PositionAlreadyExists {
                    dimension: self.code.clone(),
                    code: code.to_string(),
                });
            }
            let position = Position {
                dimension: self.code.clone(),
                code: code.to_string(),
                description: if description.is_empty() {
                    code.to_string()
                } else {
                    description.to_string()
                },
            };
            data.order.push(code.to_string());
            data.by_code.insert(code.to_string(), position.clone());
            position
        };
        self.store.insert_position(
            &self.code,
            &PositionRecord {
                code: position.code.clone(),
                description: position.description.clone(),
            },
        )?;
        self.status.push(position.code.clone());
        Ok(position)
    }

    /// Removes a position from the shared set, the local status and the
    /// store. Cube-cell cascade is handled by the catalog.
    pub(crate) fn remove_position(&mut self, code: &str) -> Result<(), EngineError> {
        {
            let mut data = self.positions.write().expect("position lock poisoned");
            if data.by_code.remove(code).is_none() {
                return Err(EngineError::PositionNotFound {
                    dimension: self.code.clone(),
                    code: code.to_string(),
                });
            }
            data.order.retain(|c| c != code);
        }
        self.status.retain(|c| c != code);
        self.store.remove_position(&self.code, code)?;
        Ok(())
    }

    pub fn has_position(&self, code: &str) -> bool {
        self.positions
            .read()
            .expect("position lock poisoned")
            .by_code
            .contains_key(code)
    }

    /// Returns one position of the dimension.
    pub fn position(&self, code: &str) -> Result<Position, EngineError> {
        self.positions
            .read()
            .expect("position lock poisoned")
            .by_code
            .get(code)
            .cloned()
            .ok_or_else(|| EngineError::PositionNotFound {
                dimension: self.code.clone(),
                code: code.to_string(),
            })
    }

    /// Every position in dimension-intrinsic (insertion) order.
    pub fn positions(&self) -> Vec<Position> {
        let data = self.positions.read().expect("position lock poisoned");
        data.order
            .iter()
            .filter_map(|code| data.by_code.get(code).cloned())
            .collect()
    }

    /// Position codes in dimension-intrinsic order.
    pub fn position_codes(&self) -> Vec<String> {
        self.positions
            .read()
            .expect("position lock poisoned")
            .order
            .clone()
    }

    pub fn position_count(&self) -> usize {
        self.positions
            .read()
            .expect("position lock poisoned")
            .order
            .len()
    }

    /// Resolves a position reference to its code, checking membership.
    pub fn resolve(&self, position: &PositionRef) -> Result<String, EngineError> {
        let code = match position {
            PositionRef::Code(code) => code.clone(),
            PositionRef::Handle(handle) => {
                if handle.dimension != self.code {
                    return Err(EngineError::PositionNotFound {
                        dimension: self.code.clone(),
                        code: handle.code.clone(),
                    });
                }
                handle.code.clone()
            }
        };
        if !self.has_position(&code) {
            return Err(EngineError::PositionNotFound {
                dimension: self.code.clone(),
                code,
            });
        }
        Ok(code)
    }

    fn resolve_all(&self, positions: &[PositionRef]) -> Result<Vec<String>, EngineError> {
        positions.iter().map(|p| self.resolve(p)).collect()
    }

    // ========================================================================
    // STATUS
    // ========================================================================

    /// The current selection, in order.
    pub fn status(&self) -> &[String] {
        &self.status
    }

    pub fn status_len(&self) -> usize {
        self.status.len()
    }

    /// The current selection as position handles.
    pub fn status_positions(&self) -> Vec<Position> {
        let data = self.positions.read().expect("position lock poisoned");
        self.status
            .iter()
            .filter_map(|code| data.by_code.get(code).cloned())
            .collect()
    }

    pub fn status_clear(&mut self) {
        self.status.clear();
    }

    /// Sets the status to all positions, in dimension order.
    pub fn status_all(&mut self) {
        self.status = self.position_codes();
    }

    /// Replaces the status. The whole candidate set is validated before any
    /// mutation happens, so a bad reference leaves the status untouched.
    pub fn status_set(&mut self, positions: &[PositionRef]) -> Result<(), EngineError> {
        let codes = self.resolve_all(positions)?;
        self.status = dedupe(codes);
        Ok(())
    }

    /// Adds positions to the status, preserving order, skipping duplicates.
    pub fn status_add(&mut self, positions: &[PositionRef]) -> Result<(), EngineError> {
        let codes = self.resolve_all(positions)?;
        let present: HashSet<&String> = self.status.iter().collect();
        let mut appended: Vec<String> = Vec::new();
        for code in codes {
            if !present.contains(&code) && !appended.contains(&code) {
                appended.push(code);
            }
        }
        self.status.extend(appended);
        Ok(())
    }

    /// Removes positions from the status. Codes not currently selected are
    /// ignored.
    pub fn status_remove(&mut self, positions: &[PositionRef]) -> Result<(), EngineError> {
        let codes: HashSet<String> = self.resolve_all(positions)?.into_iter().collect();
        self.status.retain(|code| !codes.contains(code));
        Ok(())
    }

    /// Keeps only the listed positions, preserving the current status order.
    pub fn status_keep(&mut self, positions: &[PositionRef]) -> Result<(), EngineError> {
        let codes: HashSet<String> = self.resolve_all(positions)?.into_iter().collect();
        self.status.retain(|code| codes.contains(code));
        Ok(())
    }

    /// Direct status replacement for the snapshot stack and the selector
    /// functions, which already hold validated code lists.
    pub(crate) fn set_status_codes(&mut self, codes: Vec<String>) {
        self.status = dedupe(codes);
    }
}

fn dedupe(codes: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(codes.len());
    let mut out = Vec::with_capacity(codes.len());
    for code in codes {
        if seen.insert(code.clone()) {
            out.push(code);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn dim() -> Dimension {
        let store = Arc::new(MemoryStore::new());
        let mut d = Dimension::new("PROD", "Products", store);
        for code in ["P1", "P2", "P3", "TOTPROD"] {
            d.add_position(code, "").unwrap();
        }
        d
    }

    #[test]
    fn test_add_position_rejects_duplicates() {
        let mut d = dim();
        assert!(matches!(
            d.add_position("P1", ""),
            Err(EngineError::PositionAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_new_positions_join_status() {
        let d = dim();
        assert_eq!(d.status(), &["P1", "P2", "P3", "TOTPROD"]);
    }

    #[test]
    fn test_status_set_clear_all() {
        let mut d = dim();
        d.status_set(&["P1".into(), "P2".into()]).unwrap();
        assert_eq!(d.status_len(), 2);
        d.status_clear();
        assert_eq!(d.status_len(), 0);
        d.status_all();
        assert_eq!(d.status_len(), d.position_count());
    }

    #[test]
    fn test_status_remove_scenario() {
        // status_set([P1, P2]); status_remove([P1]) => [P2]
        let mut d = dim();
        d.status_set(&["P1".into(), "P2".into()]).unwrap();
        d.status_remove(&["P1".into()]).unwrap();
        assert_eq!(d.status(), &["P2"]);
    }

    #[test]
    fn test_status_set_is_atomic_on_bad_code() {
        let mut d = dim();
        d.status_set(&["P1".into()]).unwrap();
        let err = d.status_set(&["P2".into(), "NOPE".into()]);
        assert!(matches!(err, Err(EngineError::PositionNotFound { .. })));
        // no partial mutation
        assert_eq!(d.status(), &["P1"]);
    }

    #[test]
    fn test_status_keep_preserves_order() {
        let mut d = dim();
        d.status_set(&["P3".into(), "P1".into(), "P2".into()]).unwrap();
        d.status_keep(&["P1".into(), "P3".into()]).unwrap();
        assert_eq!(d.status(), &["P3", "P1"]);
    }

    #[test]
    fn test_clone_shares_positions_not_status() {
        let mut d = dim();
        let mut copy = d.clone();
        copy.status_clear();
        assert_eq!(d.status_len(), 4);
        assert_eq!(copy.status_len(), 0);
        // a position added through one handle is visible through the other
        d.add_position("P4", "").unwrap();
        assert!(copy.has_position("P4"));
    }

    #[test]
    fn test_resolve_rejects_foreign_handle() {
        let d = dim();
        let foreign = Position {
            dimension: "GEOG".to_string(),
            code: "G1".to_string(),
            description: String::new(),
        };
        assert!(d.resolve(&PositionRef::Handle(foreign)).is_err());
    }
}
