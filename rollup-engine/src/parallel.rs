//! FILENAME: rollup-engine/src/parallel.rs
//! PURPOSE: Concurrent execution of rollup jobs.
//! CONTEXT: Jobs run in waves of scoped threads. Each worker gets its own
//! execution context, its own dimension clone (shared positions, private
//! status) and its own snapshot stack, so two rollups over the same
//! dimension never fight over the selection. Cubes are shared; their
//! interior locking keeps concurrent writers to different cubes, or to
//! disjoint coordinates of one cube, safe.

use std::thread;

use log::info;

use engine::{Catalog, ContextId, EngineError, SnapshotStack};

use crate::aggregate::rollup;

/// One rollup to run: a cube, the dimension to roll up, and the hierarchy
/// to roll it up along.
#[derive(Debug, Clone)]
pub struct AggregationJob {
    pub cube: String,
    pub dimension: String,
    pub hierarchy: String,
}

impl AggregationJob {
    pub fn new(cube: &str, dimension: &str, hierarchy: &str) -> Self {
        AggregationJob {
            cube: cube.to_string(),
            dimension: dimension.to_string(),
            hierarchy: hierarchy.to_string(),
        }
    }
}

/// Runs the jobs `degree` at a time. Jobs within a wave run concurrently;
/// the next wave starts when the whole wave has finished. The first error
/// encountered is returned after its wave completes, so no thread is left
/// running against torn state.
///
/// Note: two jobs rolling up different dimensions of the same cube belong
/// in different waves, since a rollup sums whatever the store already holds
/// along the other dimensions.
pub fn aggregate_parallel(
    catalog: &Catalog,
    jobs: &[AggregationJob],
    degree: Option<usize>,
) -> Result<(), EngineError> {
    let degree = degree
        .or_else(|| thread::available_parallelism().ok().map(usize::from))
        .unwrap_or(1)
        .max(1);
    info!("running {} rollup jobs, {} at a time", jobs.len(), degree);

    for wave in jobs.chunks(degree) {
        // resolve up front so a bad job name fails before any thread starts
        let mut prepared = Vec::with_capacity(wave.len());
        for job in wave {
            let cube = catalog.cube(&job.cube)?;
            let dim = catalog.clone_dimension(&job.dimension)?;
            let hier = catalog
                .clone_hierarchies(&job.dimension)
                .remove(&job.hierarchy)
                .ok_or_else(|| EngineError::HierarchyNotFound {
                    dimension: job.dimension.clone(),
                    code: job.hierarchy.clone(),
                })?;
            prepared.push((cube, dim, hier));
        }

        let mut outcomes: Vec<Result<(), EngineError>> = Vec::with_capacity(prepared.len());
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(prepared.len());
            for (cube, mut dim, hier) in prepared {
                handles.push(scope.spawn(move || {
                    let stack = SnapshotStack::new();
                    let ctx = ContextId::new();
                    rollup(&cube, &mut dim, &hier, &stack, ctx)
                }));
            }
            for handle in handles {
                outcomes.push(handle.join().expect("rollup worker panicked"));
            }
        });
        for outcome in outcomes {
            outcome?;
        }
    }
    Ok(())
}
