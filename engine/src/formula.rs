//! FILENAME: engine/src/formula.rs
//! PURPOSE: Virtual cubes computed from an expression over stored cubes.
//! CONTEXT: A formula looks like a cube but owns no stored cells. Reads
//! narrow every dimension to the requested coordinate, evaluate the
//! expression tree through the cube combinators, and memoize the result.
//! The memo is a snapshot taken at first read; callers invalidate it
//! explicitly after changing operand data.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::cube::{Coords, Cube};
use crate::dimension::Dimension;
use crate::error::EngineError;
use crate::snapshot::{ContextId, SnapshotStack};
use crate::store::{CoordKey, Store};
use crate::value::{BinaryOp, UnaryOp, Value};

/// Expression tree over cube codes and scalar constants.
#[derive(Debug, Clone)]
pub enum Expr {
    Cube(String),
    Scalar(f64),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    pub fn cube(code: &str) -> Expr {
        Expr::Cube(code.to_uppercase())
    }

    pub fn scalar(value: f64) -> Expr {
        Expr::Scalar(value)
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Expr {
        Expr::Unary { op, expr: Box::new(expr) }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    fn collect_cubes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Cube(code) => out.push(code),
            Expr::Scalar(_) => {}
            Expr::Unary { expr, .. } => expr.collect_cubes(out),
            Expr::Binary { left, right, .. } => {
                left.collect_cubes(out);
                right.collect_cubes(out);
            }
        }
    }
}

/// A read-only cube whose cells are computed on demand.
pub struct Formula {
    code: String,
    description: String,
    /// Union of operand cube dimensions, sorted; memo keys follow this order.
    dimensions: Vec<String>,
    expr: Expr,
    cells: RwLock<HashMap<CoordKey, Value>>,
    store: Arc<dyn Store>,
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("code", &self.code)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl Formula {
    /// Builds a formula, resolving every cube reference up front so a typo
    /// fails at definition time rather than at first read.
    pub(crate) fn new(
        code: &str,
        description: &str,
        expr: Expr,
        cubes: &HashMap<String, Arc<Cube>>,
        store: Arc<dyn Store>,
    ) -> Result<Self, EngineError> {
        let mut refs = Vec::new();
        expr.collect_cubes(&mut refs);
        let mut dimensions: Vec<String> = Vec::new();
        for cube_code in refs {
            let cube = cubes
                .get(cube_code)
                .ok_or_else(|| EngineError::CubeNotFound(cube_code.to_string()))?;
            for dim in cube.dimensions() {
                if !dimensions.contains(dim) {
                    dimensions.push(dim.clone());
                }
            }
        }
        dimensions.sort();
        Ok(Formula {
            code: code.to_uppercase(),
            description: description.to_string(),
            dimensions,
            expr,
            cells: RwLock::new(HashMap::new()),
            store,
        })
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

    /// Formulas are read-only; writes go to the operand cubes.
    pub fn set(&self, _coords: &Coords, _value: Value) -> Result<(), EngineError> {
        Err(EngineError::ReadOnlyCube(self.code.clone()))
    }

    /// Computes (or recalls) the value at a coordinate. Dimension statuses
    /// are narrowed to the coordinate for the evaluation and restored before
    /// returning, on the error path included.
    pub fn get(
        &self,
        coords: &Coords,
        dims: &mut HashMap<String, Dimension>,
        cubes: &HashMap<String, Arc<Cube>>,
        stack: &SnapshotStack,
        ctx: ContextId,
    ) -> Result<Option<Value>, EngineError> {
        let key = self.coord_key(coords, dims)?;
        if let Some(value) = self.cells.read().expect("memo lock poisoned").get(&key) {
            return Ok(Some(value.clone()));
        }

        let mut pushed: Vec<String> = Vec::with_capacity(self.dimensions.len());
        for dim_code in &self.dimensions {
            let dim = dims
                .get(dim_code)
                .ok_or_else(|| EngineError::DimensionNotFound(dim_code.clone()))?;
            stack.push(ctx, dim);
            pushed.push(dim_code.clone());
        }

        let result = self.evaluate_at(&key, dims, cubes);

        for dim_code in &pushed {
            let dim = dims.get_mut(dim_code).expect("pushed dimension present");
            stack.pop(ctx, dim)?;
        }

        let value = result?;
        if let Some(value) = &value {
            self.cells
                .write()
                .expect("memo lock poisoned")
                .insert(key, value.clone());
        }
        Ok(value)
    }

    fn evaluate_at(
        &self,
        key: &CoordKey,
        dims: &mut HashMap<String, Dimension>,
        cubes: &HashMap<String, Arc<Cube>>,
    ) -> Result<Option<Value>, EngineError> {
        for (dim_code, pos_code) in self.dimensions.iter().zip(key.iter()) {
            let dim = dims.get_mut(dim_code).expect("validated dimension present");
            dim.status_set(&[pos_code.as_str().into()])?;
        }
        let dim_refs: Vec<&Dimension> = self
            .dimensions
            .iter()
            .map(|code| dims.get(code).expect("validated dimension present"))
            .collect();
        let operand = self.eval(&self.expr, cubes, &dim_refs)?;
        let coords: Coords = self
            .dimensions
            .iter()
            .cloned()
            .zip(key.iter().cloned())
            .collect();
        operand.as_cube().get(&coords)
    }

    fn eval(
        &self,
        expr: &Expr,
        cubes: &HashMap<String, Arc<Cube>>,
        dims: &[&Dimension],
    ) -> Result<Operand, EngineError> {
        match expr {
            Expr::Cube(code) => {
                let cube = cubes
                    .get(code)
                    .ok_or_else(|| EngineError::CubeNotFound(code.clone()))?;
                Ok(Operand::Shared(Arc::clone(cube)))
            }
            Expr::Scalar(value) => Ok(Operand::Owned(Cube::scalar(
                *value,
                Arc::clone(&self.store),
            ))),
            Expr::Unary { op, expr } => {
                let inner = self.eval(expr, cubes, dims)?;
                Ok(Operand::Owned(inner.as_cube().apply_unary(*op, dims)?))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, cubes, dims)?;
                let right = self.eval(right, cubes, dims)?;
                Ok(Operand::Owned(left.as_cube().combine(
                    *op,
                    right.as_cube(),
                    dims,
                )?))
            }
        }
    }

    /// Drops the memoized cells. Call after changing operand cube data.
    pub fn invalidate(&self) {
        self.cells.write().expect("memo lock poisoned").clear();
    }

    pub fn memo_len(&self) -> usize {
        self.cells.read().expect("memo lock poisoned").len()
    }

    fn coord_key(
        &self,
        coords: &Coords,
        dims: &HashMap<String, Dimension>,
    ) -> Result<CoordKey, EngineError> {
        if coords.len() != self.dimensions.len() {
            return Err(EngineError::InvalidCoordinate(format!(
                "formula {} expects {} dimensions, got {}",
                self.code,
                self.dimensions.len(),
                coords.len()
            )));
        }
        let mut key = Vec::with_capacity(self.dimensions.len());
        for dim_code in &self.dimensions {
            let pos_code = coords.get(dim_code).ok_or_else(|| {
                EngineError::InvalidCoordinate(format!(
                    "formula {} is not dimensioned by the supplied coordinate (missing {})",
                    self.code, dim_code
                ))
            })?;
            let dim = dims
                .get(dim_code)
                .ok_or_else(|| EngineError::DimensionNotFound(dim_code.clone()))?;
            if !dim.has_position(pos_code) {
                return Err(EngineError::InvalidCoordinate(format!(
                    "unknown position {} for dimension {}",
                    pos_code, dim_code
                )));
            }
            key.push(pos_code.clone());
        }
        Ok(key)
    }
}

enum Operand {
    Shared(Arc<Cube>),
    Owned(Cube),
}

impl Operand {
    fn as_cube(&self) -> &Cube {
        match self {
            Operand::Shared(cube) => cube,
            Operand::Owned(cube) => cube,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::value::ValueType;

    fn fixture() -> (
        HashMap<String, Dimension>,
        HashMap<String, Arc<Cube>>,
        Arc<MemoryStore>,
    ) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let mut prod = Dimension::new("PROD", "Products", store.clone());
        for code in ["P1", "P2"] {
            prod.add_position(code, "").unwrap();
        }
        let sales = Cube::new("SALES", "", &[&prod], ValueType::Int, store.clone());
        let costs = Cube::new("COSTS", "", &[&prod], ValueType::Int, store.clone());
        for (code, s, c) in [("P1", 10, 4), ("P2", 20, 5)] {
            let at: Coords = [("PROD".to_string(), code.to_string())].into();
            sales.set(&at, Value::Int(s)).unwrap();
            costs.set(&at, Value::Int(c)).unwrap();
        }
        let mut dims = HashMap::new();
        dims.insert("PROD".to_string(), prod);
        let mut cubes = HashMap::new();
        cubes.insert("SALES".to_string(), Arc::new(sales));
        cubes.insert("COSTS".to_string(), Arc::new(costs));
        (dims, cubes, store)
    }

    fn at(code: &str) -> Coords {
        [("PROD".to_string(), code.to_string())].into()
    }

    #[test]
    fn test_difference_of_two_cubes() {
        let (mut dims, cubes, store) = fixture();
        let profit = Formula::new(
            "PROFIT",
            "",
            Expr::binary(BinaryOp::Subtract, Expr::cube("SALES"), Expr::cube("COSTS")),
            &cubes,
            store,
        )
        .unwrap();
        let stack = SnapshotStack::new();
        let ctx = ContextId::new();
        assert_eq!(
            profit.get(&at("P1"), &mut dims, &cubes, &stack, ctx).unwrap(),
            Some(Value::Int(6))
        );
        assert_eq!(
            profit.get(&at("P2"), &mut dims, &cubes, &stack, ctx).unwrap(),
            Some(Value::Int(15))
        );
    }

    #[test]
    fn test_scalar_operand_broadcasts() {
        let (mut dims, cubes, store) = fixture();
        let doubled = Formula::new(
            "DOUBLED",
            "",
            Expr::binary(BinaryOp::Multiply, Expr::cube("SALES"), Expr::scalar(2.0)),
            &cubes,
            store,
        )
        .unwrap();
        let stack = SnapshotStack::new();
        let ctx = ContextId::new();
        assert_eq!(
            doubled.get(&at("P1"), &mut dims, &cubes, &stack, ctx).unwrap(),
            Some(Value::Int(20))
        );
    }

    #[test]
    fn test_status_restored_after_read() {
        let (mut dims, cubes, store) = fixture();
        let profit = Formula::new(
            "PROFIT",
            "",
            Expr::binary(BinaryOp::Subtract, Expr::cube("SALES"), Expr::cube("COSTS")),
            &cubes,
            store,
        )
        .unwrap();
        dims.get_mut("PROD").unwrap().status_all();
        let stack = SnapshotStack::new();
        let ctx = ContextId::new();
        profit.get(&at("P1"), &mut dims, &cubes, &stack, ctx).unwrap();
        assert_eq!(
            dims["PROD"].status(),
            &["P1".to_string(), "P2".to_string()]
        );
        assert_eq!(stack.depth(ctx, &dims["PROD"]), 0);
    }

    #[test]
    fn test_memo_and_invalidate() {
        let (mut dims, cubes, store) = fixture();
        let profit = Formula::new(
            "PROFIT",
            "",
            Expr::binary(BinaryOp::Subtract, Expr::cube("SALES"), Expr::cube("COSTS")),
            &cubes,
            store,
        )
        .unwrap();
        let stack = SnapshotStack::new();
        let ctx = ContextId::new();
        assert_eq!(
            profit.get(&at("P1"), &mut dims, &cubes, &stack, ctx).unwrap(),
            Some(Value::Int(6))
        );
        // operand changes are not visible until invalidation
        cubes["SALES"].set(&at("P1"), Value::Int(100)).unwrap();
        assert_eq!(
            profit.get(&at("P1"), &mut dims, &cubes, &stack, ctx).unwrap(),
            Some(Value::Int(6))
        );
        profit.invalidate();
        assert_eq!(profit.memo_len(), 0);
        assert_eq!(
            profit.get(&at("P1"), &mut dims, &cubes, &stack, ctx).unwrap(),
            Some(Value::Int(96))
        );
    }

    #[test]
    fn test_set_is_rejected() {
        let (_dims, cubes, store) = fixture();
        let profit = Formula::new("PROFIT", "", Expr::cube("SALES"), &cubes, store).unwrap();
        assert!(matches!(
            profit.set(&at("P1"), Value::Int(1)),
            Err(EngineError::ReadOnlyCube(_))
        ));
    }

    #[test]
    fn test_unknown_cube_rejected_at_definition() {
        let (_dims, cubes, store) = fixture();
        assert!(matches!(
            Formula::new("BAD", "", Expr::cube("NOPE"), &cubes, store),
            Err(EngineError::CubeNotFound(_))
        ));
    }
}
