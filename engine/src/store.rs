//! FILENAME: engine/src/store.rs
//! PURPOSE: Storage collaborator contract and the default in-memory backend.
//! CONTEXT: Dimensions, hierarchies and cubes treat persistent storage as an
//! external collaborator. The engine only needs a handful of operations:
//! single-cell reads, single-dimension scans, batched upserts and metadata
//! bookkeeping. `MemoryStore` is the reference backend; the persistence
//! crate serializes its snapshot to disk.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::value::{Value, ValueType};

/// A persisted coordinate: one position code per cube dimension, in the
/// cube's dimension order.
pub type CoordKey = Vec<String>;

/// Persisted form of a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub code: String,
    pub description: String,
}

/// Persisted form of a hierarchy link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub child: String,
    pub parent: String,
}

/// Persisted cube metadata, written back on every `Cube::update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeMeta {
    pub code: String,
    pub description: String,
    pub dimensions: Vec<String>,
    pub value_type: ValueType,
    pub aggregated_dims: Vec<String>,
}

/// Cell-level operations consumed by `Cube`.
pub trait CellStore: Send + Sync {
    /// Looks up one persisted cell.
    fn find_one(&self, cube: &str, key: &CoordKey) -> Result<Option<Value>, StoreError>;

    /// Returns every persisted cell whose coordinate holds `code` at
    /// dimension index `dim_index`. This is the rollup per-level read.
    fn scan(
        &self,
        cube: &str,
        dim_index: usize,
        code: &str,
    ) -> Result<Vec<(CoordKey, Value)>, StoreError>;

    /// Upserts a batch of cells in one call.
    fn batch_upsert(&self, cube: &str, cells: &[(CoordKey, Value)]) -> Result<(), StoreError>;

    /// Deletes every cell whose coordinate holds `code` at `dim_index`
    /// (position deletion cascade).
    fn delete_where(&self, cube: &str, dim_index: usize, code: &str) -> Result<(), StoreError>;

    /// Declares the unique index over the cube's dimensions. Idempotent.
    fn ensure_unique_index(&self, cube: &str, dims: &[String]) -> Result<(), StoreError>;

    /// Drops all cells of a cube.
    fn drop_cube(&self, cube: &str) -> Result<(), StoreError>;
}

/// Dimension/hierarchy/cube metadata operations.
pub trait MetaStore: Send + Sync {
    fn insert_position(&self, dim: &str, record: &PositionRecord) -> Result<(), StoreError>;
    fn remove_position(&self, dim: &str, code: &str) -> Result<(), StoreError>;
    fn list_positions(&self, dim: &str) -> Result<Vec<PositionRecord>, StoreError>;
    fn drop_dimension(&self, dim: &str) -> Result<(), StoreError>;

    fn set_link(&self, dim: &str, hier: &str, child: &str, parent: &str)
        -> Result<(), StoreError>;
    fn remove_link(&self, dim: &str, hier: &str, child: &str) -> Result<(), StoreError>;
    fn list_links(&self, dim: &str, hier: &str) -> Result<Vec<LinkRecord>, StoreError>;
    fn drop_hierarchy(&self, dim: &str, hier: &str) -> Result<(), StoreError>;
    fn list_hierarchies(&self, dim: &str) -> Result<Vec<String>, StoreError>;

    /// Traversal index written by `check_hier`, one entry per position.
    fn set_position_index(
        &self,
        dim: &str,
        hier: &str,
        code: &str,
        index: u64,
    ) -> Result<(), StoreError>;
    fn list_position_indexes(
        &self,
        dim: &str,
        hier: &str,
    ) -> Result<Vec<(String, u64)>, StoreError>;

    fn save_cube_meta(&self, meta: &CubeMeta) -> Result<(), StoreError>;
    fn load_cube_meta(&self, code: &str) -> Result<Option<CubeMeta>, StoreError>;
    fn list_cube_metas(&self) -> Result<Vec<CubeMeta>, StoreError>;
    fn remove_cube_meta(&self, code: &str) -> Result<(), StoreError>;
    fn list_dimensions(&self) -> Result<Vec<String>, StoreError>;
}

/// Full storage collaborator.
pub trait Store: CellStore + MetaStore {}

impl<T: CellStore + MetaStore> Store for T {}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// Serializable image of the whole store. The persistence crate writes this
/// to disk and reads it back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub cells: HashMap<String, Vec<(CoordKey, Value)>>,
    pub positions: HashMap<String, Vec<PositionRecord>>,
    pub links: HashMap<String, HashMap<String, Vec<LinkRecord>>>,
    pub position_indexes: HashMap<String, HashMap<String, Vec<(String, u64)>>>,
    pub cube_metas: Vec<CubeMeta>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    /// cube code -> coordinate -> value
    cells: HashMap<String, HashMap<CoordKey, Value>>,
    /// cube code -> indexed dimension list
    indexes: HashMap<String, Vec<String>>,
    /// dimension code -> ordered positions
    positions: HashMap<String, Vec<PositionRecord>>,
    /// (dimension, hierarchy) -> child -> parent
    links: HashMap<(String, String), HashMap<String, String>>,
    /// (dimension, hierarchy) -> position -> traversal index
    position_indexes: HashMap<(String, String), HashMap<String, u64>>,
    /// cube code -> metadata
    cube_metas: HashMap<String, CubeMeta>,
}

/// Default storage backend: plain maps behind one mutex. Source of truth for
/// cube cells; the cube cache on top of it may be evicted freely.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Exports the whole store as a serializable snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut cells = HashMap::new();
        for (cube, map) in &inner.cells {
            let mut list: Vec<(CoordKey, Value)> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            list.sort_by(|a, b| a.0.cmp(&b.0));
            cells.insert(cube.clone(), list);
        }
        let mut links: HashMap<String, HashMap<String, Vec<LinkRecord>>> = HashMap::new();
        for ((dim, hier), map) in &inner.links {
            let mut list: Vec<LinkRecord> = map
                .iter()
                .map(|(child, parent)| LinkRecord {
                    child: child.clone(),
                    parent: parent.clone(),
                })
                .collect();
            list.sort_by(|a, b| a.child.cmp(&b.child));
            links
                .entry(dim.clone())
                .or_default()
                .insert(hier.clone(), list);
        }
        let mut position_indexes: HashMap<String, HashMap<String, Vec<(String, u64)>>> =
            HashMap::new();
        for ((dim, hier), map) in &inner.position_indexes {
            let mut list: Vec<(String, u64)> =
                map.iter().map(|(c, i)| (c.clone(), *i)).collect();
            list.sort_by(|a, b| a.0.cmp(&b.0));
            position_indexes
                .entry(dim.clone())
                .or_default()
                .insert(hier.clone(), list);
        }
        let mut cube_metas: Vec<CubeMeta> = inner.cube_metas.values().cloned().collect();
        cube_metas.sort_by(|a, b| a.code.cmp(&b.code));
        StoreSnapshot {
            cells,
            positions: inner.positions.clone(),
            links,
            position_indexes,
            cube_metas,
        }
    }

    /// Rebuilds a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut inner = MemoryInner::default();
        for (cube, list) in snapshot.cells {
            inner.cells.insert(cube, list.into_iter().collect());
        }
        inner.positions = snapshot.positions;
        for (dim, hiers) in snapshot.links {
            for (hier, list) in hiers {
                inner.links.insert(
                    (dim.clone(), hier),
                    list.into_iter().map(|l| (l.child, l.parent)).collect(),
                );
            }
        }
        for (dim, hiers) in snapshot.position_indexes {
            for (hier, list) in hiers {
                inner
                    .position_indexes
                    .insert((dim.clone(), hier), list.into_iter().collect());
            }
        }
        for meta in snapshot.cube_metas {
            inner.cube_metas.insert(meta.code.clone(), meta);
        }
        MemoryStore {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl CellStore for MemoryStore {
    fn find_one(&self, cube: &str, key: &CoordKey) -> Result<Option<Value>, StoreError> {
        Ok(self
            .lock()
            .cells
            .get(cube)
            .and_then(|cells| cells.get(key))
            .cloned())
    }

    fn scan(
        &self,
        cube: &str,
        dim_index: usize,
        code: &str,
    ) -> Result<Vec<(CoordKey, Value)>, StoreError> {
        let inner = self.lock();
        let mut out = Vec::new();
        if let Some(cells) = inner.cells.get(cube) {
            for (key, value) in cells {
                if key.get(dim_index).map(String::as_str) == Some(code) {
                    out.push((key.clone(), value.clone()));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn batch_upsert(&self, cube: &str, cells: &[(CoordKey, Value)]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let target = inner.cells.entry(cube.to_string()).or_default();
        for (key, value) in cells {
            target.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_where(&self, cube: &str, dim_index: usize, code: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(cells) = inner.cells.get_mut(cube) {
            cells.retain(|key, _| key.get(dim_index).map(String::as_str) != Some(code));
        }
        Ok(())
    }

    fn ensure_unique_index(&self, cube: &str, dims: &[String]) -> Result<(), StoreError> {
        self.lock().indexes.insert(cube.to_string(), dims.to_vec());
        Ok(())
    }

    fn drop_cube(&self, cube: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.cells.remove(cube);
        inner.indexes.remove(cube);
        Ok(())
    }
}

impl MetaStore for MemoryStore {
    fn insert_position(&self, dim: &str, record: &PositionRecord) -> Result<(), StoreError> {
        self.lock()
            .positions
            .entry(dim.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn remove_position(&self, dim: &str, code: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(list) = inner.positions.get_mut(dim) {
            list.retain(|p| p.code != code);
        }
        Ok(())
    }

    fn list_positions(&self, dim: &str) -> Result<Vec<PositionRecord>, StoreError> {
        Ok(self.lock().positions.get(dim).cloned().unwrap_or_default())
    }

    fn drop_dimension(&self, dim: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.positions.remove(dim);
        inner.links.retain(|(d, _), _| d != dim);
        inner.position_indexes.retain(|(d, _), _| d != dim);
        Ok(())
    }

    fn set_link(
        &self,
        dim: &str,
        hier: &str,
        child: &str,
        parent: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .links
            .entry((dim.to_string(), hier.to_string()))
            .or_default()
            .insert(child.to_string(), parent.to_string());
        Ok(())
    }

    fn remove_link(&self, dim: &str, hier: &str, child: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(links) = inner.links.get_mut(&(dim.to_string(), hier.to_string())) {
            links.remove(child);
        }
        Ok(())
    }

    fn list_links(&self, dim: &str, hier: &str) -> Result<Vec<LinkRecord>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<LinkRecord> = inner
            .links
            .get(&(dim.to_string(), hier.to_string()))
            .map(|links| {
                links
                    .iter()
                    .map(|(child, parent)| LinkRecord {
                        child: child.clone(),
                        parent: parent.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.child.cmp(&b.child));
        Ok(out)
    }

    fn drop_hierarchy(&self, dim: &str, hier: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.links.remove(&(dim.to_string(), hier.to_string()));
        inner
            .position_indexes
            .remove(&(dim.to_string(), hier.to_string()));
        Ok(())
    }

    fn list_hierarchies(&self, dim: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<String> = inner
            .links
            .keys()
            .filter(|(d, _)| d == dim)
            .map(|(_, h)| h.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn set_position_index(
        &self,
        dim: &str,
        hier: &str,
        code: &str,
        index: u64,
    ) -> Result<(), StoreError> {
        self.lock()
            .position_indexes
            .entry((dim.to_string(), hier.to_string()))
            .or_default()
            .insert(code.to_string(), index);
        Ok(())
    }

    fn list_position_indexes(
        &self,
        dim: &str,
        hier: &str,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<(String, u64)> = inner
            .position_indexes
            .get(&(dim.to_string(), hier.to_string()))
            .map(|m| m.iter().map(|(c, i)| (c.clone(), *i)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn save_cube_meta(&self, meta: &CubeMeta) -> Result<(), StoreError> {
        self.lock()
            .cube_metas
            .insert(meta.code.clone(), meta.clone());
        Ok(())
    }

    fn load_cube_meta(&self, code: &str) -> Result<Option<CubeMeta>, StoreError> {
        Ok(self.lock().cube_metas.get(code).cloned())
    }

    fn list_cube_metas(&self) -> Result<Vec<CubeMeta>, StoreError> {
        let mut out: Vec<CubeMeta> = self.lock().cube_metas.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    fn remove_cube_meta(&self, code: &str) -> Result<(), StoreError> {
        self.lock().cube_metas.remove(code);
        Ok(())
    }

    fn list_dimensions(&self) -> Result<Vec<String>, StoreError> {
        let mut out: Vec<String> = self.lock().positions.keys().cloned().collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[&str]) -> CoordKey {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cell_roundtrip() {
        let store = MemoryStore::new();
        store
            .batch_upsert("SALES", &[(key(&["P1", "G1"]), Value::Int(10))])
            .unwrap();
        assert_eq!(
            store.find_one("SALES", &key(&["P1", "G1"])).unwrap(),
            Some(Value::Int(10))
        );
        assert_eq!(store.find_one("SALES", &key(&["P2", "G1"])).unwrap(), None);
    }

    #[test]
    fn test_scan_filters_on_dimension_index() {
        let store = MemoryStore::new();
        store
            .batch_upsert(
                "SALES",
                &[
                    (key(&["P1", "G1"]), Value::Int(1)),
                    (key(&["P1", "G2"]), Value::Int(2)),
                    (key(&["P2", "G1"]), Value::Int(3)),
                ],
            )
            .unwrap();
        let hits = store.scan("SALES", 0, "P1").unwrap();
        assert_eq!(hits.len(), 2);
        let hits = store.scan("SALES", 1, "G1").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_delete_where_cascade() {
        let store = MemoryStore::new();
        store
            .batch_upsert(
                "SALES",
                &[
                    (key(&["P1", "G1"]), Value::Int(1)),
                    (key(&["P2", "G1"]), Value::Int(3)),
                ],
            )
            .unwrap();
        store.delete_where("SALES", 0, "P1").unwrap();
        assert_eq!(store.find_one("SALES", &key(&["P1", "G1"])).unwrap(), None);
        assert!(store.find_one("SALES", &key(&["P2", "G1"])).unwrap().is_some());
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let store = MemoryStore::new();
        store
            .batch_upsert("SALES", &[(key(&["P1"]), Value::Int(3))])
            .unwrap();
        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let parsed: StoreSnapshot = serde_json::from_str(&json).unwrap();
        let restored = MemoryStore::from_snapshot(parsed);
        assert_eq!(
            restored.find_one("SALES", &key(&["P1"])).unwrap(),
            Some(Value::Int(3))
        );
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let store = MemoryStore::new();
        store
            .insert_position(
                "PROD",
                &PositionRecord {
                    code: "P1".to_string(),
                    description: "Product 1".to_string(),
                },
            )
            .unwrap();
        store.set_link("PROD", "STD", "P1", "TOT").unwrap();
        store
            .batch_upsert("SALES", &[(key(&["P1"]), Value::Int(7))])
            .unwrap();
        let restored = MemoryStore::from_snapshot(store.snapshot());
        assert_eq!(restored.list_positions("PROD").unwrap().len(), 1);
        assert_eq!(restored.list_links("PROD", "STD").unwrap().len(), 1);
        assert_eq!(
            restored.find_one("SALES", &key(&["P1"])).unwrap(),
            Some(Value::Int(7))
        );
    }
}
