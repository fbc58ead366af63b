//! FILENAME: engine/src/catalog.rs
//! PURPOSE: Registry and lifecycle owner for dimensions, hierarchies, cubes
//! and formulas.
//! CONTEXT: One catalog per store. Creation goes through the catalog so
//! names stay unique and referential rules hold (a cube's dimensions must
//! exist, a dimension in use cannot be deleted). Deletion cascades: dropping
//! a position clears its hierarchy links and its cube cells. Workers take
//! cheap clones of dimensions and hierarchies and share cubes by Arc.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use crate::cube::{Coords, Cube};
use crate::dimension::{Dimension, Position};
use crate::error::EngineError;
use crate::formula::{Expr, Formula};
use crate::hierarchy::Hierarchy;
use crate::snapshot::{ContextId, SnapshotStack};
use crate::store::Store;
use crate::value::{Value, ValueType};

/// The registry of every named object in the engine.
pub struct Catalog {
    store: Arc<dyn Store>,
    dims: HashMap<String, Dimension>,
    /// dimension code -> hierarchy code -> hierarchy
    hiers: HashMap<String, HashMap<String, Hierarchy>>,
    cubes: HashMap<String, Arc<Cube>>,
    formulas: HashMap<String, Arc<Formula>>,
    snapshots: SnapshotStack,
    ctx: ContextId,
}

impl Catalog {
    /// An empty catalog over a fresh store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Catalog {
            store,
            dims: HashMap::new(),
            hiers: HashMap::new(),
            cubes: HashMap::new(),
            formulas: HashMap::new(),
            snapshots: SnapshotStack::new(),
            ctx: ContextId::new(),
        }
    }

    /// Rebuilds a catalog from a populated store. Every dimension comes up
    /// with all positions in status; formulas are not persisted and must be
    /// redefined by the caller.
    pub fn load(store: Arc<dyn Store>) -> Result<Self, EngineError> {
        let mut catalog = Catalog::new(Arc::clone(&store));
        for dim_code in store.list_dimensions()? {
            let records = store.list_positions(&dim_code)?;
            let mut dim =
                Dimension::from_records(&dim_code, &dim_code, records, Arc::clone(&store));
            dim.status_all();
            let mut hiers = HashMap::new();
            for hier_code in store.list_hierarchies(&dim_code)? {
                let links = store.list_links(&dim_code, &hier_code)?;
                let indexes = store.list_position_indexes(&dim_code, &hier_code)?;
                let hier =
                    Hierarchy::from_records(&dim, &hier_code, links, indexes, Arc::clone(&store));
                hiers.insert(hier_code, hier);
            }
            catalog.hiers.insert(dim_code.clone(), hiers);
            catalog.dims.insert(dim_code, dim);
        }
        for meta in store.list_cube_metas()? {
            let dim_refs: Vec<&Dimension> = meta
                .dimensions
                .iter()
                .map(|code| {
                    catalog
                        .dims
                        .get(code)
                        .ok_or_else(|| EngineError::DimensionNotFound(code.clone()))
                })
                .collect::<Result<_, _>>()?;
            let cube = Cube::new(
                &meta.code,
                &meta.description,
                &dim_refs,
                meta.value_type,
                Arc::clone(&store),
            );
            cube.restore_aggregated(meta.aggregated_dims.clone());
            catalog.cubes.insert(meta.code.clone(), Arc::new(cube));
        }
        info!(
            "catalog loaded: {} dimensions, {} cubes",
            catalog.dims.len(),
            catalog.cubes.len()
        );
        Ok(catalog)
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Execution context of the catalog's own thread.
    pub fn ctx(&self) -> ContextId {
        self.ctx
    }

    pub fn snapshots(&self) -> &SnapshotStack {
        &self.snapshots
    }

    // ========================================================================
    // DIMENSIONS
    // ========================================================================

    pub fn create_dimension(&mut self, code: &str, description: &str) -> Result<(), EngineError> {
        let code = code.to_uppercase();
        if self.dims.contains_key(&code) {
            return Err(EngineError::DimensionAlreadyExists(code));
        }
        let dim = Dimension::new(&code, description, Arc::clone(&self.store));
        self.hiers.insert(code.clone(), HashMap::new());
        self.dims.insert(code, dim);
        Ok(())
    }

    pub fn dimension(&self, code: &str) -> Result<&Dimension, EngineError> {
        self.dims
            .get(code)
            .ok_or_else(|| EngineError::DimensionNotFound(code.to_string()))
    }

    pub fn dimension_mut(&mut self, code: &str) -> Result<&mut Dimension, EngineError> {
        self.dims
            .get_mut(code)
            .ok_or_else(|| EngineError::DimensionNotFound(code.to_string()))
    }

    pub fn dimension_codes(&self) -> Vec<String> {
        let mut out: Vec<String> = self.dims.keys().cloned().collect();
        out.sort();
        out
    }

    /// Deletes a dimension and everything hanging off it. Refused while any
    /// cube is dimensioned by it.
    pub fn delete_dimension(&mut self, code: &str) -> Result<(), EngineError> {
        if !self.dims.contains_key(code) {
            return Err(EngineError::DimensionNotFound(code.to_string()));
        }
        if self.cubes.values().any(|cube| cube.has_dimension(code)) {
            return Err(EngineError::DimensionInUse(code.to_string()));
        }
        self.dims.remove(code);
        self.hiers.remove(code);
        self.store.drop_dimension(code)?;
        Ok(())
    }

    // ========================================================================
    // POSITIONS
    // ========================================================================

    pub fn add_position(
        &mut self,
        dim: &str,
        code: &str,
        description: &str,
    ) -> Result<Position, EngineError> {
        self.dimension_mut(dim)?.add_position(code, description)
    }

    /// Deletes a position, cascading into hierarchy links and cube cells.
    pub fn delete_position(&mut self, dim: &str, code: &str) -> Result<(), EngineError> {
        self.dimension_mut(dim)?.remove_position(code)?;
        if let Some(hiers) = self.hiers.get(dim) {
            for hier in hiers.values() {
                if hier.parent(code).is_some() {
                    hier.unset(code)?;
                }
                for child in hier.children_of(code) {
                    hier.unset(&child)?;
                }
            }
        }
        for cube in self.cubes.values() {
            if !cube.has_dimension(dim) {
                continue;
            }
            cube.purge_position(dim, code)?;
            let index = cube
                .dimensions()
                .iter()
                .position(|d| d == dim)
                .expect("dimension checked above");
            self.store.delete_where(cube.code(), index, code)?;
        }
        Ok(())
    }

    // ========================================================================
    // HIERARCHIES
    // ========================================================================

    pub fn create_hierarchy(&mut self, dim: &str, code: &str) -> Result<(), EngineError> {
        let code = code.to_uppercase();
        let dimension = self
            .dims
            .get(dim)
            .ok_or_else(|| EngineError::DimensionNotFound(dim.to_string()))?;
        let hiers = self.hiers.entry(dim.to_string()).or_default();
        if hiers.contains_key(&code) {
            return Err(EngineError::HierarchyAlreadyExists {
                dimension: dim.to_string(),
                code,
            });
        }
        let hier = Hierarchy::new(dimension, &code, Arc::clone(&self.store));
        hiers.insert(code, hier);
        Ok(())
    }

    pub fn hierarchy(&self, dim: &str, code: &str) -> Result<&Hierarchy, EngineError> {
        self.hiers
            .get(dim)
            .and_then(|hiers| hiers.get(code))
            .ok_or_else(|| EngineError::HierarchyNotFound {
                dimension: dim.to_string(),
                code: code.to_string(),
            })
    }

    pub fn delete_hierarchy(&mut self, dim: &str, code: &str) -> Result<(), EngineError> {
        let removed = self
            .hiers
            .get_mut(dim)
            .and_then(|hiers| hiers.remove(code));
        if removed.is_none() {
            return Err(EngineError::HierarchyNotFound {
                dimension: dim.to_string(),
                code: code.to_string(),
            });
        }
        self.store.drop_hierarchy(dim, code)?;
        Ok(())
    }

    // ========================================================================
    // CUBES
    // ========================================================================

    pub fn create_cube(
        &mut self,
        code: &str,
        description: &str,
        dims: &[&str],
        value_type: ValueType,
    ) -> Result<(), EngineError> {
        let code = code.to_uppercase();
        if self.cubes.contains_key(&code) {
            return Err(EngineError::CubeAlreadyExists(code));
        }
        let dim_refs: Vec<&Dimension> = dims
            .iter()
            .map(|d| {
                self.dims
                    .get(*d)
                    .ok_or_else(|| EngineError::DimensionNotFound(d.to_string()))
            })
            .collect::<Result<_, _>>()?;
        let cube = Cube::new(
            &code,
            description,
            &dim_refs,
            value_type,
            Arc::clone(&self.store),
        );
        self.store.save_cube_meta(&cube.meta())?;
        self.cubes.insert(code, Arc::new(cube));
        Ok(())
    }

    pub fn cube(&self, code: &str) -> Result<Arc<Cube>, EngineError> {
        self.cubes
            .get(code)
            .cloned()
            .ok_or_else(|| EngineError::CubeNotFound(code.to_string()))
    }

    pub fn cube_codes(&self) -> Vec<String> {
        let mut out: Vec<String> = self.cubes.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn delete_cube(&mut self, code: &str) -> Result<(), EngineError> {
        if self.cubes.remove(code).is_none() {
            return Err(EngineError::CubeNotFound(code.to_string()));
        }
        self.store.drop_cube(code)?;
        self.store.remove_cube_meta(code)?;
        Ok(())
    }

    /// Flushes every cube's pending writes.
    pub fn update_all(&self) -> Result<(), EngineError> {
        for cube in self.cubes.values() {
            cube.update()?;
        }
        Ok(())
    }

    /// Discards every cube's pending writes.
    pub fn rollback_all(&self) {
        for cube in self.cubes.values() {
            cube.rollback();
        }
    }

    // ========================================================================
    // FORMULAS
    // ========================================================================

    pub fn create_formula(
        &mut self,
        code: &str,
        description: &str,
        expr: Expr,
    ) -> Result<(), EngineError> {
        let code = code.to_uppercase();
        if self.formulas.contains_key(&code) {
            return Err(EngineError::FormulaAlreadyExists(code));
        }
        let formula = Formula::new(
            &code,
            description,
            expr,
            &self.cubes,
            Arc::clone(&self.store),
        )?;
        self.formulas.insert(code, Arc::new(formula));
        Ok(())
    }

    pub fn formula(&self, code: &str) -> Result<Arc<Formula>, EngineError> {
        self.formulas
            .get(code)
            .cloned()
            .ok_or_else(|| EngineError::FormulaNotFound(code.to_string()))
    }

    pub fn delete_formula(&mut self, code: &str) -> Result<(), EngineError> {
        if self.formulas.remove(code).is_none() {
            return Err(EngineError::FormulaNotFound(code.to_string()));
        }
        Ok(())
    }

    /// Evaluates a formula at a coordinate using the catalog's own
    /// dimensions and context.
    pub fn formula_value(
        &mut self,
        code: &str,
        coords: &Coords,
    ) -> Result<Option<Value>, EngineError> {
        let formula = self.formula(code)?;
        formula.get(coords, &mut self.dims, &self.cubes, &self.snapshots, self.ctx)
    }

    // ========================================================================
    // WORKER VIEWS
    // ========================================================================

    /// A worker-local copy of one dimension: shared positions, own status.
    pub fn clone_dimension(&self, code: &str) -> Result<Dimension, EngineError> {
        self.dimension(code).cloned()
    }

    pub fn clone_dimensions(&self) -> HashMap<String, Dimension> {
        self.dims.clone()
    }

    /// Worker-local copies of one dimension's hierarchies (link data stays
    /// shared).
    pub fn clone_hierarchies(&self, dim: &str) -> HashMap<String, Hierarchy> {
        self.hiers.get(dim).cloned().unwrap_or_default()
    }
}
