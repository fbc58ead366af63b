//! FILENAME: loader/src/lib.rs
//! Bulk loading of positions, hierarchy links and cube cells
//!
//! A load takes record streams and feeds them into a catalog. Loads are
//! forgiving by design: a record that cannot be applied is logged and
//! skipped rather than aborting the batch, except for links whose parent
//! simply has not arrived yet. Those are deferred and retried once the rest
//! of the batch is in, which lets link streams arrive in any order.

use std::collections::HashSet;

use log::{info, warn};

use engine::{Catalog, Coords, EngineError, Value};
use rollup_engine::check_hier;

/// One record of a load batch.
#[derive(Debug, Clone)]
pub enum LoadRecord {
    Position {
        dimension: String,
        code: String,
        description: String,
    },
    Link {
        dimension: String,
        hierarchy: String,
        child: String,
        parent: String,
    },
    Cell {
        cube: String,
        coords: Coords,
        value: Value,
    },
}

/// A stream of load records. Sources pull from wherever the data lives;
/// the loader only ever iterates them once.
pub trait RecordSource {
    fn name(&self) -> &str;
    fn records(&mut self) -> Result<Vec<LoadRecord>, EngineError>;
}

/// The simplest source: records already in memory.
pub struct VecSource {
    name: String,
    records: Vec<LoadRecord>,
}

impl VecSource {
    pub fn new(name: &str, records: Vec<LoadRecord>) -> Self {
        VecSource {
            name: name.to_string(),
            records,
        }
    }
}

impl RecordSource for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn records(&mut self) -> Result<Vec<LoadRecord>, EngineError> {
        Ok(std::mem::take(&mut self.records))
    }
}

/// Counters reported back to the caller after a load.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub positions: usize,
    pub links: usize,
    pub cells: usize,
    pub skipped: usize,
}

/// Applies every source to the catalog, then flushes the touched cubes and
/// re-indexes the touched hierarchies. Unapplied records are counted in the
/// report and logged with the source they came from.
pub fn load(catalog: &mut Catalog, sources: &mut [&mut dyn RecordSource]) -> Result<LoadReport, EngineError> {
    let mut report = LoadReport::default();
    let mut deferred_links: Vec<(String, LoadRecord)> = Vec::new();
    let mut touched_cubes: HashSet<String> = HashSet::new();
    let mut touched_hiers: HashSet<(String, String)> = HashSet::new();

    for source in sources.iter_mut() {
        let name = source.name().to_string();
        for record in source.records()? {
            match apply(catalog, &record, &mut report, &mut touched_cubes, &mut touched_hiers) {
                Ok(()) => {}
                // a link to a parent that has not arrived yet gets a
                // second chance after the batch
                Err(EngineError::PositionNotFound { .. })
                    if matches!(record, LoadRecord::Link { .. }) =>
                {
                    deferred_links.push((name.clone(), record));
                }
                Err(err) => {
                    warn!("[{}] record skipped: {}", name, err);
                    report.skipped += 1;
                }
            }
        }
    }

    for (name, record) in deferred_links {
        if let Err(err) = apply(catalog, &record, &mut report, &mut touched_cubes, &mut touched_hiers) {
            warn!("[{}] record skipped after retry: {}", name, err);
            report.skipped += 1;
        }
    }

    for cube_code in &touched_cubes {
        catalog.cube(cube_code)?.update()?;
    }
    for (dim, hier) in &touched_hiers {
        check_hier(catalog.hierarchy(dim, hier)?)?;
    }

    info!(
        "load complete: {} positions, {} links, {} cells, {} skipped",
        report.positions, report.links, report.cells, report.skipped
    );
    Ok(report)
}

fn apply(
    catalog: &mut Catalog,
    record: &LoadRecord,
    report: &mut LoadReport,
    touched_cubes: &mut HashSet<String>,
    touched_hiers: &mut HashSet<(String, String)>,
) -> Result<(), EngineError> {
    match record {
        LoadRecord::Position {
            dimension,
            code,
            description,
        } => {
            match catalog.add_position(dimension, code, description) {
                Ok(_) => report.positions += 1,
                // re-loading an existing position is not an error
                Err(EngineError::PositionAlreadyExists { .. }) => {}
                Err(err) => return Err(err),
            }
            Ok(())
        }
        LoadRecord::Link {
            dimension,
            hierarchy,
            child,
            parent,
        } => {
            catalog.hierarchy(dimension, hierarchy)?.set(child, parent)?;
            touched_hiers.insert((dimension.clone(), hierarchy.clone()));
            report.links += 1;
            Ok(())
        }
        LoadRecord::Cell { cube, coords, value } => {
            catalog.cube(cube)?.set(coords, value.clone())?;
            touched_cubes.insert(cube.clone());
            report.cells += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{MemoryStore, ValueType};
    use std::sync::Arc;

    fn coords(pairs: &[(&str, &str)]) -> Coords {
        pairs
            .iter()
            .map(|(d, c)| (d.to_string(), c.to_string()))
            .collect()
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new(Arc::new(MemoryStore::new()));
        catalog.create_dimension("PROD", "Products").unwrap();
        catalog.create_hierarchy("PROD", "STD").unwrap();
        catalog
            .create_cube("SALES", "Sales", &["PROD"], ValueType::Int)
            .unwrap();
        catalog
    }

    fn position(code: &str) -> LoadRecord {
        LoadRecord::Position {
            dimension: "PROD".to_string(),
            code: code.to_string(),
            description: String::new(),
        }
    }

    fn link(child: &str, parent: &str) -> LoadRecord {
        LoadRecord::Link {
            dimension: "PROD".to_string(),
            hierarchy: "STD".to_string(),
            child: child.to_string(),
            parent: parent.to_string(),
        }
    }

    #[test]
    fn test_load_positions_links_and_cells() {
        let mut catalog = catalog();
        let mut source = VecSource::new(
            "batch-1",
            vec![
                position("P1"),
                position("TOTPROD"),
                link("P1", "TOTPROD"),
                LoadRecord::Cell {
                    cube: "SALES".to_string(),
                    coords: coords(&[("PROD", "P1")]),
                    value: Value::Int(10),
                },
            ],
        );
        let report = load(&mut catalog, &mut [&mut source]).unwrap();
        assert_eq!(report.positions, 2);
        assert_eq!(report.links, 1);
        assert_eq!(report.cells, 1);
        assert_eq!(report.skipped, 0);

        // the load flushed: the cell is persisted, not just cached
        let cube = catalog.cube("SALES").unwrap();
        assert_eq!(cube.dirty_len(), 0);
        assert_eq!(cube.scan_dimension("PROD", "P1").unwrap().len(), 1);
        // and the touched hierarchy was re-indexed
        assert_eq!(
            catalog.hierarchy("PROD", "STD").unwrap().order_index("TOTPROD"),
            Some(0)
        );
    }

    #[test]
    fn test_links_may_arrive_before_their_parent() {
        let mut catalog = catalog();
        let mut source = VecSource::new(
            "out-of-order",
            vec![
                position("P1"),
                link("P1", "TOTPROD"),
                position("TOTPROD"),
            ],
        );
        let report = load(&mut catalog, &mut [&mut source]).unwrap();
        assert_eq!(report.links, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(
            catalog.hierarchy("PROD", "STD").unwrap().parent("P1"),
            Some("TOTPROD".to_string())
        );
    }

    #[test]
    fn test_bad_records_are_skipped_not_fatal() {
        let mut catalog = catalog();
        let mut source = VecSource::new(
            "dirty",
            vec![
                position("P1"),
                LoadRecord::Cell {
                    cube: "NOPE".to_string(),
                    coords: coords(&[("PROD", "P1")]),
                    value: Value::Int(1),
                },
                link("P1", "NEVER_ARRIVES"),
                LoadRecord::Cell {
                    cube: "SALES".to_string(),
                    coords: coords(&[("PROD", "P1")]),
                    value: Value::Int(5),
                },
            ],
        );
        let report = load(&mut catalog, &mut [&mut source]).unwrap();
        assert_eq!(report.cells, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            catalog
                .cube("SALES")
                .unwrap()
                .get(&coords(&[("PROD", "P1")]))
                .unwrap(),
            Some(Value::Int(5))
        );
    }

    #[test]
    fn test_reloading_positions_is_idempotent() {
        let mut catalog = catalog();
        let mut first = VecSource::new("a", vec![position("P1")]);
        load(&mut catalog, &mut [&mut first]).unwrap();
        let mut second = VecSource::new("b", vec![position("P1")]);
        let report = load(&mut catalog, &mut [&mut second]).unwrap();
        assert_eq!(report.skipped, 0);
        assert_eq!(catalog.dimension("PROD").unwrap().position_count(), 1);
    }

    #[test]
    fn test_multiple_sources_in_one_batch() {
        let mut catalog = catalog();
        let mut structure = VecSource::new(
            "structure",
            vec![position("P1"), position("P2"), position("TOTPROD"),
                 link("P1", "TOTPROD"), link("P2", "TOTPROD")],
        );
        let mut data = VecSource::new(
            "data",
            vec![
                LoadRecord::Cell {
                    cube: "SALES".to_string(),
                    coords: coords(&[("PROD", "P1")]),
                    value: Value::Int(1),
                },
                LoadRecord::Cell {
                    cube: "SALES".to_string(),
                    coords: coords(&[("PROD", "P2")]),
                    value: Value::Int(2),
                },
            ],
        );
        let report = load(&mut catalog, &mut [&mut structure, &mut data]).unwrap();
        assert_eq!(report.positions, 3);
        assert_eq!(report.links, 2);
        assert_eq!(report.cells, 2);
    }
}
