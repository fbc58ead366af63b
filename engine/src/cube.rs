//! FILENAME: engine/src/cube.rs
//! PURPOSE: Sparse multidimensional value store with write-back caching.
//! CONTEXT: A cube addresses cells by one position code per dimension. The
//! in-memory cell map is a cache over the storage collaborator (storage is
//! the source of truth); `set` marks coordinates dirty, `update` flushes
//! them in one batch. The dirty set uses capture-and-clear so concurrent
//! writers during a flush land in the next flush, never lost and never
//! double-flushed. Arithmetic combinators build new, unsaved cubes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::dimension::{Dimension, PositionData};
use crate::error::EngineError;
use crate::store::{CoordKey, CubeMeta, Store};
use crate::value::{BinaryOp, UnaryOp, Value, ValueType};

/// A coordinate at the API boundary: dimension code -> position code.
pub type Coords = HashMap<String, String>;

/// Cross product of the current statuses of the given dimensions, in the
/// given dimension order. This is the query set of the cube combinators and
/// of dynamic aggregation.
pub fn status_product(dims: &[&Dimension]) -> Vec<Coords> {
    let mut out: Vec<Coords> = vec![Coords::new()];
    for dim in dims {
        let mut next = Vec::with_capacity(out.len() * dim.status_len().max(1));
        for partial in &out {
            for code in dim.status() {
                let mut coords = partial.clone();
                coords.insert(dim.code().to_string(), code.clone());
                next.push(coords);
            }
        }
        out = next;
    }
    // an empty status on any dimension empties the product
    if dims.iter().any(|d| d.status_len() == 0) {
        return Vec::new();
    }
    out
}

/// Object holding the data, dimensioned by dimensions.
pub struct Cube {
    code: String,
    description: String,
    /// Dimension codes, sorted; cell keys follow this order.
    dimensions: Vec<String>,
    /// Position data of each dimension, aligned with `dimensions`.
    dim_positions: Vec<Arc<RwLock<PositionData>>>,
    value_type: ValueType,
    cells: RwLock<HashMap<CoordKey, Value>>,
    dirty: Mutex<HashSet<CoordKey>>,
    aggregated: Mutex<HashSet<String>>,
    store: Arc<dyn Store>,
    /// Unsaved cubes (combinator results) never touch the store.
    saved: bool,
}

impl fmt::Debug for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cube")
            .field("code", &self.code)
            .field("dimensions", &self.dimensions)
            .field("value_type", &self.value_type)
            .finish()
    }
}

impl Cube {
    pub(crate) fn new(
        code: &str,
        description: &str,
        dims: &[&Dimension],
        value_type: ValueType,
        store: Arc<dyn Store>,
    ) -> Self {
        let mut ordered: Vec<&Dimension> = dims.to_vec();
        ordered.sort_by(|a, b| a.code().cmp(b.code()));
        Cube {
            code: code.to_uppercase(),
            description: description.to_string(),
            dimensions: ordered.iter().map(|d| d.code().to_string()).collect(),
            dim_positions: ordered.iter().map(|d| d.position_data()).collect(),
            value_type,
            cells: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            aggregated: Mutex::new(HashSet::new()),
            store,
            saved: true,
        }
    }

    /// A detached working cube for combinator results: same store handle,
    /// but never persisted and invisible to the catalog.
    fn detached(dims: Vec<(&String, Arc<RwLock<PositionData>>)>, value_type: ValueType, store: Arc<dyn Store>) -> Self {
        Cube {
            code: "TMP_EXPRESSION".to_string(),
            description: String::new(),
            dimensions: dims.iter().map(|(code, _)| (*code).clone()).collect(),
            dim_positions: dims.into_iter().map(|(_, p)| p).collect(),
            value_type,
            cells: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            aggregated: Mutex::new(HashSet::new()),
            store,
            saved: false,
        }
    }

    /// A zero-dimensional cube holding one scalar value. Combining it with
    /// an n-dimensional cube broadcasts the scalar over every coordinate.
    pub(crate) fn scalar(value: f64, store: Arc<dyn Store>) -> Self {
        let cube = Cube::detached(Vec::new(), ValueType::Float, store);
        cube.cells
            .write()
            .expect("cell lock poisoned")
            .insert(Vec::new(), Value::Float(value));
        cube
    }

    pub(crate) fn restore_aggregated(&self, dims: Vec<String>) {
        let mut aggregated = self.aggregated.lock().expect("aggregated lock poisoned");
        aggregated.extend(dims);
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn has_dimension(&self, dim: &str) -> bool {
        self.dimensions.iter().any(|d| d == dim)
    }

    fn dim_index(&self, dim: &str) -> Result<usize, EngineError> {
        self.dimensions
            .iter()
            .position(|d| d == dim)
            .ok_or_else(|| EngineError::DimensionNotFound(dim.to_string()))
    }

    /// Validates a coordinate and turns it into a cell key: exact arity,
    /// known dimensions, and every code present in its dimension.
    pub fn coord_key(&self, coords: &Coords) -> Result<CoordKey, EngineError> {
        if coords.len() != self.dimensions.len() {
            return Err(EngineError::InvalidCoordinate(format!(
                "cube {} expects {} dimensions, got {}",
                self.code,
                self.dimensions.len(),
                coords.len()
            )));
        }
        let mut key = Vec::with_capacity(self.dimensions.len());
        for (index, dim) in self.dimensions.iter().enumerate() {
            let code = coords.get(dim).ok_or_else(|| {
                EngineError::InvalidCoordinate(format!(
                    "cube {} is not dimensioned by the supplied coordinate (missing {})",
                    self.code, dim
                ))
            })?;
            let known = self.dim_positions[index]
                .read()
                .expect("position lock poisoned")
                .by_code
                .contains_key(code);
            if !known {
                return Err(EngineError::InvalidCoordinate(format!(
                    "unknown position {} for dimension {}",
                    code, dim
                )));
            }
            key.push(code.clone());
        }
        Ok(key)
    }

    /// Turns a cell key back into a coordinate map.
    pub fn key_coords(&self, key: &CoordKey) -> Coords {
        self.dimensions
            .iter()
            .cloned()
            .zip(key.iter().cloned())
            .collect()
    }

    // ========================================================================
    // CELL ACCESS
    // ========================================================================

    /// Sets a cell. The value is coerced to the cube's declared type; the
    /// coordinate is marked dirty for the next flush.
    pub fn set(&self, coords: &Coords, value: Value) -> Result<(), EngineError> {
        let key = self.coord_key(coords)?;
        self.set_key(key, value)
    }

    /// Write path for callers that already hold a validated key (the
    /// aggregation engine works on keys coming straight from the store).
    pub fn set_key(&self, key: CoordKey, value: Value) -> Result<(), EngineError> {
        let value = value.coerce(self.value_type)?;
        self.cells
            .write()
            .expect("cell lock poisoned")
            .insert(key.clone(), value);
        self.dirty.lock().expect("dirty lock poisoned").insert(key);
        Ok(())
    }

    /// Reads a cell: cache first, then the store (caching the hit). Returns
    /// None when the cell does not exist anywhere, which is distinct from a
    /// stored zero.
    pub fn get(&self, coords: &Coords) -> Result<Option<Value>, EngineError> {
        let key = self.coord_key(coords)?;
        self.get_key(&key)
    }

    /// Key-based read path, see `get`.
    pub fn get_key(&self, key: &CoordKey) -> Result<Option<Value>, EngineError> {
        if let Some(value) = self.cells.read().expect("cell lock poisoned").get(key) {
            return Ok(Some(value.clone()));
        }
        if !self.saved {
            return Ok(None);
        }
        match self.store.find_one(&self.code, key)? {
            Some(value) => {
                self.cells
                    .write()
                    .expect("cell lock poisoned")
                    .insert(key.clone(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Persisted cells whose coordinate pins `dim` to `code`. This reads the
    /// store, not the cache: rollup levels only see flushed data, which is
    /// why each level ends with a mandatory `update`.
    pub fn scan_dimension(
        &self,
        dim: &str,
        code: &str,
    ) -> Result<Vec<(CoordKey, Value)>, EngineError> {
        let index = self.dim_index(dim)?;
        Ok(self.store.scan(&self.code, index, code)?)
    }

    // ========================================================================
    // WRITE-BACK
    // ========================================================================

    /// Flushes pending writes. The dirty set is captured and replaced under
    /// a short critical section; concurrent `set` calls during the store
    /// I/O are preserved for the next flush. Cube metadata (description,
    /// aggregated dimensions) is persisted along with the cells.
    pub fn update(&self) -> Result<(), EngineError> {
        if !self.saved {
            return Ok(());
        }
        self.store.ensure_unique_index(&self.code, &self.dimensions)?;
        let captured: Vec<CoordKey> = {
            let mut dirty = self.dirty.lock().expect("dirty lock poisoned");
            std::mem::take(&mut *dirty).into_iter().collect()
        };
        if !captured.is_empty() {
            let batch: Vec<(CoordKey, Value)> = {
                let cells = self.cells.read().expect("cell lock poisoned");
                captured
                    .iter()
                    .filter_map(|key| cells.get(key).map(|v| (key.clone(), v.clone())))
                    .collect()
            };
            debug!("[{}] flushing {} cells", self.code, batch.len());
            self.store.batch_upsert(&self.code, &batch)?;
        }
        self.store.save_cube_meta(&self.meta())?;
        Ok(())
    }

    /// Discards pending writes without flushing. Cached values remain as
    /// set in memory; only the dirty bookkeeping is dropped.
    pub fn rollback(&self) {
        self.dirty.lock().expect("dirty lock poisoned").clear();
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.lock().expect("dirty lock poisoned").len()
    }

    pub fn cached_cell_count(&self) -> usize {
        self.cells.read().expect("cell lock poisoned").len()
    }

    /// Drops cached and pending cells referencing a position (position
    /// deletion cascade; the catalog removes the persisted cells).
    pub(crate) fn purge_position(&self, dim: &str, code: &str) -> Result<(), EngineError> {
        let index = self.dim_index(dim)?;
        self.cells
            .write()
            .expect("cell lock poisoned")
            .retain(|key, _| key.get(index).map(String::as_str) != Some(code));
        self.dirty
            .lock()
            .expect("dirty lock poisoned")
            .retain(|key| key.get(index).map(String::as_str) != Some(code));
        Ok(())
    }

    pub fn meta(&self) -> CubeMeta {
        let mut aggregated: Vec<String> = self
            .aggregated
            .lock()
            .expect("aggregated lock poisoned")
            .iter()
            .cloned()
            .collect();
        aggregated.sort();
        CubeMeta {
            code: self.code.clone(),
            description: self.description.clone(),
            dimensions: self.dimensions.clone(),
            value_type: self.value_type,
            aggregated_dims: aggregated,
        }
    }

    // ========================================================================
    // AGGREGATION BOOKKEEPING
    // ========================================================================

    /// Marks a dimension as fully materialized by rollup.
    pub fn declare_aggregated_dim(&self, dim: &str) {
        self.aggregated
            .lock()
            .expect("aggregated lock poisoned")
            .insert(dim.to_string());
    }

    pub fn is_aggregated(&self, dim: &str) -> bool {
        self.aggregated
            .lock()
            .expect("aggregated lock poisoned")
            .contains(dim)
    }

    pub fn aggregated_dims(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .aggregated
            .lock()
            .expect("aggregated lock poisoned")
            .iter()
            .cloned()
            .collect();
        out.sort();
        out
    }

    // ========================================================================
    // ARITHMETIC COMBINATORS
    // ========================================================================

    /// Binary combinator. The result is a new, unsaved cube over the union
    /// of both operand dimension sets; its cells are computed over the cross
    /// product of the current statuses, with missing operand cells
    /// defaulting to zero.
    pub fn combine(
        &self,
        op: BinaryOp,
        other: &Cube,
        dims: &[&Dimension],
    ) -> Result<Cube, EngineError> {
        let mut union: Vec<String> = self.dimensions.clone();
        for dim in &other.dimensions {
            if !union.contains(dim) {
                union.push(dim.clone());
            }
        }
        union.sort();
        let result = self.build_result(&union, dims)?;
        let product_dims = resolve_dims(&union, dims)?;
        for coords in status_product(&product_dims) {
            let left = self
                .get(&restrict(&coords, &self.dimensions))?
                .unwrap_or_else(|| Value::zero(self.value_type));
            let right = other
                .get(&restrict(&coords, &other.dimensions))?
                .unwrap_or_else(|| Value::zero(other.value_type));
            let value = Value::apply_binary(op, &left, &right)?;
            result.set(&coords, value)?;
        }
        Ok(result)
    }

    /// Binary combinator against a scalar operand.
    pub fn combine_scalar(
        &self,
        op: BinaryOp,
        scalar: f64,
        dims: &[&Dimension],
    ) -> Result<Cube, EngineError> {
        let result = self.build_result(&self.dimensions.clone(), dims)?;
        let product_dims = resolve_dims(&self.dimensions, dims)?;
        let right = Value::Float(scalar);
        for coords in status_product(&product_dims) {
            let left = self
                .get(&coords)?
                .unwrap_or_else(|| Value::zero(self.value_type));
            let value = Value::apply_binary(op, &left, &right)?;
            result.set(&coords, value)?;
        }
        Ok(result)
    }

    /// Unary combinator over the current status. Missing cells stay
    /// missing; only existing values are transformed.
    pub fn apply_unary(&self, op: UnaryOp, dims: &[&Dimension]) -> Result<Cube, EngineError> {
        let result = self.build_result(&self.dimensions.clone(), dims)?;
        let product_dims = resolve_dims(&self.dimensions, dims)?;
        for coords in status_product(&product_dims) {
            if let Some(value) = self.get(&coords)? {
                result.set(&coords, Value::apply_unary(op, &value)?)?;
            }
        }
        Ok(result)
    }

    /// Builds the detached result cube, seeded with a deep copy of this
    /// cube's cached values when the dimensionality matches.
    fn build_result(&self, union: &[String], dims: &[&Dimension]) -> Result<Cube, EngineError> {
        let mut spec: Vec<(&String, Arc<RwLock<PositionData>>)> = Vec::with_capacity(union.len());
        for code in union {
            if let Some(index) = self.dimensions.iter().position(|d| d == code) {
                spec.push((code, Arc::clone(&self.dim_positions[index])));
            } else {
                let dim = dims
                    .iter()
                    .find(|d| d.code() == code)
                    .ok_or_else(|| EngineError::DimensionNotFound(code.clone()))?;
                spec.push((code, dim.position_data()));
            }
        }
        let result = Cube::detached(spec, self.value_type, Arc::clone(&self.store));
        if result.dimensions == self.dimensions {
            let seed = self.cells.read().expect("cell lock poisoned").clone();
            *result.cells.write().expect("cell lock poisoned") = seed;
        }
        Ok(result)
    }
}

fn resolve_dims<'a>(
    codes: &[String],
    dims: &[&'a Dimension],
) -> Result<Vec<&'a Dimension>, EngineError> {
    codes
        .iter()
        .map(|code| {
            dims.iter()
                .find(|d| d.code() == code)
                .copied()
                .ok_or_else(|| EngineError::DimensionNotFound(code.clone()))
        })
        .collect()
}

fn restrict(coords: &Coords, dims: &[String]) -> Coords {
    coords
        .iter()
        .filter(|(dim, _)| dims.contains(dim))
        .map(|(d, c)| (d.clone(), c.clone()))
        .collect()
}
