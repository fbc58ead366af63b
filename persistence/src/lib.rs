//! FILENAME: persistence/src/lib.rs
//! OLAP database persistence
//!
//! Saves and loads the whole store (positions, links, traversal indexes,
//! cube metadata and cells) as a single JSON snapshot file. Flush cube
//! caches with `Catalog::update_all` before saving; the snapshot covers
//! only what the store holds.

mod error;
mod reader;
mod writer;

pub use error::PersistenceError;
pub use reader::load_store;
pub use writer::save_store;

use engine::StoreSnapshot;
use serde::{Deserialize, Serialize};

/// Marker written into every database file.
pub const FORMAT_NAME: &str = "olap-db";

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub format: String,
    pub version: u32,
    pub store: StoreSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Catalog, Coords, MemoryStore, Value, ValueType};
    use std::sync::Arc;

    fn coords(pairs: &[(&str, &str)]) -> Coords {
        pairs
            .iter()
            .map(|(d, c)| (d.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.olap");

        let store = Arc::new(MemoryStore::new());
        {
            let mut catalog = Catalog::new(store.clone());
            catalog.create_dimension("PROD", "Products").unwrap();
            catalog.add_position("PROD", "P1", "Product 1").unwrap();
            catalog.add_position("PROD", "TOTPROD", "Total").unwrap();
            catalog.create_hierarchy("PROD", "STD").unwrap();
            catalog
                .hierarchy("PROD", "STD")
                .unwrap()
                .set("P1", "TOTPROD")
                .unwrap();
            catalog
                .create_cube("SALES", "Sales", &["PROD"], ValueType::Int)
                .unwrap();
            let cube = catalog.cube("SALES").unwrap();
            cube.set(&coords(&[("PROD", "P1")]), Value::Int(42)).unwrap();
            catalog.update_all().unwrap();
        }
        save_store(&store, &path).unwrap();

        let restored = Arc::new(load_store(&path).unwrap());
        let catalog = Catalog::load(restored).unwrap();
        assert_eq!(
            catalog.hierarchy("PROD", "STD").unwrap().parent("P1"),
            Some("TOTPROD".to_string())
        );
        assert_eq!(
            catalog
                .cube("SALES")
                .unwrap()
                .get(&coords(&[("PROD", "P1")]))
                .unwrap(),
            Some(Value::Int(42))
        );
    }

    #[test]
    fn test_unflushed_cells_stay_out_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.olap");

        let store = Arc::new(MemoryStore::new());
        let mut catalog = Catalog::new(store.clone());
        catalog.create_dimension("PROD", "").unwrap();
        catalog.add_position("PROD", "P1", "").unwrap();
        catalog
            .create_cube("SALES", "", &["PROD"], ValueType::Int)
            .unwrap();
        catalog
            .cube("SALES")
            .unwrap()
            .set(&coords(&[("PROD", "P1")]), Value::Int(1))
            .unwrap();
        // no update_all: the cell is dirty, not stored
        save_store(&store, &path).unwrap();

        let restored = Arc::new(load_store(&path).unwrap());
        let catalog = Catalog::load(restored).unwrap();
        assert_eq!(
            catalog
                .cube("SALES")
                .unwrap()
                .get(&coords(&[("PROD", "P1")]))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-db.json");
        std::fs::write(
            &path,
            r#"{"format":"something-else","version":1,"store":{}}"#,
        )
        .unwrap();
        assert!(load_store(&path).is_err());

        std::fs::write(&path, "garbage").unwrap();
        assert!(matches!(
            load_store(&path),
            Err(PersistenceError::Json(_))
        ));
    }

    #[test]
    fn test_rejects_newer_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.olap");
        let store = MemoryStore::new();
        let envelope = Envelope {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION + 1,
            store: store.snapshot(),
        };
        std::fs::write(&path, serde_json::to_string(&envelope).unwrap()).unwrap();
        assert!(matches!(
            load_store(&path),
            Err(PersistenceError::InvalidFormat(_))
        ));
    }
}
