//! FILENAME: rollup-engine/src/aggregate.rs
//! Rollup - the calculation core that materializes hierarchy totals.
//!
//! This module takes a cube, a dimension and a hierarchy over it and sums
//! child cells into their parents, one hierarchy level at a time.
//!
//! Algorithm:
//! 1. Compute every hierarchy position's height (longest distance to a leaf)
//! 2. Walk the heights bottom-up; the status holds the current level
//! 3. For every position of the level, scan each child's persisted cells and
//!    add them into the parent coordinate
//! 4. Flush the level before moving up
//!
//! Scheduling by height rather than by parent hops is what keeps uneven
//! branches correct: a parent with a shallow child and a deep child is
//! computed exactly once, after both branches are final. Each level reads
//! the store, not the cache, which is why step 4's flush is mandatory.

use std::collections::HashMap;

use log::{debug, info};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use engine::{
    limit, status_product, BinaryOp, ContextId, Coords, Cube, Dimension, EngineError, Hierarchy,
    Mode, PositionRef, Selector, SnapshotStack, Value,
};

/// Cells scanned between intermediate flushes. Keeps the dirty set bounded
/// on cubes whose levels are wider than memory comfortably holds.
pub const UPDATE_INTERVAL: usize = 500_000;

/// Parent coordinates stay on the stack for cubes of up to six dimensions.
type LevelKey = SmallVec<[String; 6]>;

/// Materializes every level of `hier` into the cube along `dim`.
///
/// The dimension's status is used as working state and restored before
/// returning, on the error path included. On success the dimension is
/// declared aggregated on the cube.
pub fn rollup(
    cube: &Cube,
    dim: &mut Dimension,
    hier: &Hierarchy,
    stack: &SnapshotStack,
    ctx: ContextId,
) -> Result<(), EngineError> {
    stack.with_restored(ctx, dim, |dim| rollup_levels(cube, dim, hier))?;
    cube.declare_aggregated_dim(dim.code());
    info!("[{}] rollup of {} complete", cube.code(), dim.code());
    Ok(())
}

fn rollup_levels(cube: &Cube, dim: &mut Dimension, hier: &Hierarchy) -> Result<(), EngineError> {
    let dim_index = cube
        .dimensions()
        .iter()
        .position(|d| d == dim.code())
        .ok_or_else(|| EngineError::DimensionNotFound(dim.code().to_string()))?;

    let heights = position_heights(hier);
    let max_height = heights.values().copied().max().unwrap_or(0);

    for height in 1..=max_height {
        let mut level_codes: Vec<&String> = heights
            .iter()
            .filter(|(_, h)| **h == height)
            .map(|(code, _)| code)
            .collect();
        level_codes.sort();
        let refs: Vec<PositionRef> = level_codes
            .iter()
            .map(|code| PositionRef::from(code.as_str()))
            .collect();
        dim.status_set(&refs)?;

        // parent coordinate -> running sum for this level
        let mut acc: FxHashMap<LevelKey, Value> = FxHashMap::default();
        let mut scanned = 0usize;
        for parent in level_codes {
            for child in hier.children_of(parent) {
                for (key, value) in cube.scan_dimension(dim.code(), &child)? {
                    let parent_key: LevelKey = key
                        .iter()
                        .enumerate()
                        .map(|(i, part)| {
                            if i == dim_index {
                                parent.clone()
                            } else {
                                part.clone()
                            }
                        })
                        .collect();
                    match acc.get_mut(&parent_key) {
                        Some(sum) => *sum = Value::apply_binary(BinaryOp::Add, sum, &value)?,
                        None => {
                            acc.insert(parent_key, value.coerce(cube.value_type())?);
                        }
                    }
                    scanned += 1;
                    if scanned % UPDATE_INTERVAL == 0 {
                        flush_level(cube, &acc)?;
                        debug!(
                            "[{}] level {}: {} cells scanned, intermediate flush",
                            cube.code(),
                            height,
                            scanned
                        );
                    }
                }
            }
        }
        flush_level(cube, &acc)?;
        debug!(
            "[{}] level {} done: {} parent cells from {} scanned",
            cube.code(),
            height,
            acc.len(),
            scanned
        );
    }
    Ok(())
}

/// Longest distance to a leaf for every position in the hierarchy. Leaves
/// are height 0; a parent's height is one more than its tallest child.
/// Iterative post-order, so deep hierarchies cannot blow the call stack.
fn position_heights(hier: &Hierarchy) -> FxHashMap<String, usize> {
    let mut children: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for (child, parent) in hier.links_map() {
        children.entry(parent).or_default().push(child);
    }
    let mut heights: FxHashMap<String, usize> = FxHashMap::default();
    let mut stack: Vec<(String, bool)> = hier
        .roots()
        .into_iter()
        .map(|root| (root, false))
        .collect();
    while let Some((code, expanded)) = stack.pop() {
        if expanded {
            let height = children
                .get(&code)
                .map(|kids| kids.iter().map(|kid| heights[kid] + 1).max().unwrap_or(0))
                .unwrap_or(0);
            heights.insert(code, height);
        } else {
            if heights.contains_key(&code) {
                continue;
            }
            stack.push((code.clone(), true));
            if let Some(kids) = children.get(&code) {
                for kid in kids {
                    if !heights.contains_key(kid) {
                        stack.push((kid.clone(), false));
                    }
                }
            }
        }
    }
    heights
}

fn flush_level(cube: &Cube, acc: &FxHashMap<LevelKey, Value>) -> Result<(), EngineError> {
    for (key, value) in acc {
        cube.set_key(key.to_vec(), value.clone())?;
    }
    cube.update()
}

/// Rolls up every listed dimension of the cube, one after another, running
/// every hierarchy a dimension carries before moving on. Later dimensions
/// sum over the totals the earlier ones materialized, so the result carries
/// every cross total.
pub fn aggregate(
    cube: &Cube,
    dims: &mut HashMap<String, Dimension>,
    hiers: &HashMap<String, Vec<Hierarchy>>,
    stack: &SnapshotStack,
    ctx: ContextId,
) -> Result<(), EngineError> {
    let mut ordered: Vec<&String> = hiers.keys().collect();
    ordered.sort();
    for dim_code in ordered {
        if !cube.has_dimension(dim_code) {
            return Err(EngineError::DimensionNotFound(dim_code.clone()));
        }
        let dim = dims
            .get_mut(dim_code)
            .ok_or_else(|| EngineError::DimensionNotFound(dim_code.clone()))?;
        for hier in &hiers[dim_code] {
            rollup(cube, dim, hier, stack, ctx)?;
        }
    }
    Ok(())
}

/// Computes one aggregated cell on demand, without materializing levels.
///
/// Every cube dimension with a hierarchy is expanded from its requested
/// position down to that position's bottom descendants; the cell values over
/// the expansion's cross product are summed. A position with no descendants
/// stands for itself. The result is cached in the cube at the requested
/// coordinate; a repeat read is a plain lookup. Returns None when the
/// expansion covers no stored cell at all; that outcome is not cached (a
/// stored zero and an absent cell stay distinguishable), so repeating the
/// call for an empty region walks the expansion again.
pub fn dyn_aggregate(
    cube: &Cube,
    coords: &Coords,
    hiers: &HashMap<String, Hierarchy>,
    dims: &mut HashMap<String, Dimension>,
    stack: &SnapshotStack,
    ctx: ContextId,
) -> Result<Option<Value>, EngineError> {
    if let Some(value) = cube.get(coords)? {
        return Ok(Some(value));
    }

    let mut pushed: Vec<String> = Vec::with_capacity(cube.dimensions().len());
    for dim_code in cube.dimensions() {
        let dim = dims
            .get(dim_code)
            .ok_or_else(|| EngineError::DimensionNotFound(dim_code.clone()))?;
        stack.push(ctx, dim);
        pushed.push(dim_code.clone());
    }

    let result = expand_and_sum(cube, coords, hiers, dims);

    for dim_code in &pushed {
        let dim = dims.get_mut(dim_code).expect("pushed dimension present");
        stack.pop(ctx, dim)?;
    }

    match result? {
        Some(value) => {
            cube.set(coords, value.clone())?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn expand_and_sum(
    cube: &Cube,
    coords: &Coords,
    hiers: &HashMap<String, Hierarchy>,
    dims: &mut HashMap<String, Dimension>,
) -> Result<Option<Value>, EngineError> {
    for dim_code in cube.dimensions() {
        let position = coords
            .get(dim_code)
            .ok_or_else(|| {
                EngineError::InvalidCoordinate(format!(
                    "cube {} is not dimensioned by the supplied coordinate (missing {})",
                    cube.code(),
                    dim_code
                ))
            })?
            .clone();
        let dim = dims.get_mut(dim_code).expect("checked by caller");
        dim.status_set(&[position.as_str().into()])?;
        // dimensions already materialized by rollup stay pinned; their
        // totals are in the store
        if cube.is_aggregated(dim_code) {
            continue;
        }
        if let Some(hier) = hiers.get(dim_code) {
            limit(dim, Mode::To, Selector::LastDescendants(hier))?;
            if dim.status_len() == 0 {
                // bottom-level position: it stands for itself
                dim.status_set(&[position.as_str().into()])?;
            }
        }
    }
    let dim_refs: Vec<&Dimension> = cube
        .dimensions()
        .iter()
        .map(|code| dims.get(code).expect("checked by caller"))
        .collect();
    let mut total: Option<Value> = None;
    for cell_coords in status_product(&dim_refs) {
        if let Some(value) = cube.get(&cell_coords)? {
            total = Some(match total {
                Some(sum) => Value::apply_binary(BinaryOp::Add, &sum, &value)?,
                None => value.coerce(cube.value_type())?,
            });
        }
    }
    Ok(total)
}
