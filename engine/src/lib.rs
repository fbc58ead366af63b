//! FILENAME: engine/src/lib.rs
//! PURPOSE: Main library entry point for the aggregation engine.
//! CONTEXT: Re-exports public types and modules for use by other crates.

pub mod catalog;
pub mod cube;
pub mod dimension;
pub mod error;
pub mod formula;
pub mod hierarchy;
pub mod selector;
pub mod snapshot;
pub mod store;
pub mod value;

// Re-export commonly used types at the crate root
pub use catalog::Catalog;
pub use cube::{status_product, Coords, Cube};
pub use dimension::{Dimension, Position, PositionRef};
pub use error::{EngineError, StoreError};
pub use formula::{Expr, Formula};
pub use hierarchy::Hierarchy;
pub use selector::{limit, Mode, Selector};
pub use snapshot::{ContextId, SnapshotStack};
pub use store::{
    CellStore, CoordKey, CubeMeta, LinkRecord, MemoryStore, MetaStore, PositionRecord, Store,
    StoreSnapshot,
};
pub use value::{BinaryOp, UnaryOp, Value, ValueType};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn coords(pairs: &[(&str, &str)]) -> Coords {
        pairs
            .iter()
            .map(|(d, c)| (d.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn it_creates_dimensions_and_cubes() {
        let mut catalog = Catalog::new(Arc::new(MemoryStore::new()));
        catalog.create_dimension("PROD", "Products").unwrap();
        catalog.add_position("PROD", "P1", "Product 1").unwrap();
        catalog
            .create_cube("SALES", "Sales", &["PROD"], ValueType::Int)
            .unwrap();
        let cube = catalog.cube("SALES").unwrap();
        cube.set(&coords(&[("PROD", "P1")]), Value::Int(10)).unwrap();
        assert_eq!(
            cube.get(&coords(&[("PROD", "P1")])).unwrap(),
            Some(Value::Int(10))
        );
    }

    #[test]
    fn integration_test_status_and_selectors() {
        let mut catalog = Catalog::new(Arc::new(MemoryStore::new()));
        catalog.create_dimension("PROD", "").unwrap();
        for code in ["P1", "P2", "P3", "TOTPROD"] {
            catalog.add_position("PROD", code, "").unwrap();
        }
        catalog.create_hierarchy("PROD", "STD").unwrap();
        for child in ["P1", "P2", "P3"] {
            catalog
                .hierarchy("PROD", "STD")
                .unwrap()
                .set(child, "TOTPROD")
                .unwrap();
        }
        let hier = catalog.hierarchy("PROD", "STD").unwrap().clone();
        let dim = catalog.dimension_mut("PROD").unwrap();
        limit(dim, Mode::To, Selector::LastDescendants(&hier)).unwrap();
        assert_eq!(dim.status(), &["P1", "P2", "P3"]);
        limit(dim, Mode::To, Selector::Parents(&hier)).unwrap();
        assert_eq!(dim.status(), &["TOTPROD"]);
    }

    #[test]
    fn integration_test_snapshot_roundtrip_through_formula() {
        let mut catalog = Catalog::new(Arc::new(MemoryStore::new()));
        catalog.create_dimension("PROD", "").unwrap();
        catalog.add_position("PROD", "P1", "").unwrap();
        catalog.add_position("PROD", "P2", "").unwrap();
        catalog
            .create_cube("SALES", "", &["PROD"], ValueType::Float)
            .unwrap();
        catalog
            .cube("SALES")
            .unwrap()
            .set(&coords(&[("PROD", "P1")]), Value::Float(2.5))
            .unwrap();
        catalog
            .create_formula(
                "TWICE",
                "",
                Expr::binary(BinaryOp::Multiply, Expr::cube("SALES"), Expr::scalar(2.0)),
            )
            .unwrap();
        assert_eq!(
            catalog
                .formula_value("TWICE", &coords(&[("PROD", "P1")]))
                .unwrap(),
            Some(Value::Float(5.0))
        );
        // the formula read did not disturb the catalog's own selection
        assert_eq!(catalog.dimension("PROD").unwrap().status_len(), 2);
    }
}
