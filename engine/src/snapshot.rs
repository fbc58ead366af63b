//! FILENAME: engine/src/snapshot.rs
//! PURPOSE: Save/restore stack for dimension statuses.
//! CONTEXT: Internal operations (rollup, dynamic aggregation, formula
//! evaluation) narrow dimension statuses to do their work and must hand the
//! caller's selection back unchanged, even when they nest. Frames are keyed
//! by an explicit execution context plus dimension code, so concurrent
//! workers sharing one stack never see each other's frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::dimension::Dimension;
use crate::error::EngineError;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical execution (a worker, a request, a test).
/// Snapshot frames pushed under one context are invisible to every other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// A fresh, process-unique context.
    pub fn new() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        ContextId::new()
    }
}

/// Stack of saved statuses, keyed by (context, dimension).
#[derive(Debug, Default)]
pub struct SnapshotStack {
    frames: Mutex<HashMap<(u64, String), Vec<Vec<String>>>>,
}

impl SnapshotStack {
    pub fn new() -> Self {
        SnapshotStack::default()
    }

    /// Saves the dimension's current status as a new frame.
    pub fn push(&self, ctx: ContextId, dim: &Dimension) {
        let mut frames = self.frames.lock().expect("snapshot lock poisoned");
        frames
            .entry((ctx.0, dim.code().to_string()))
            .or_default()
            .push(dim.status().to_vec());
    }

    /// Restores the most recent frame for this context and dimension.
    /// Frames restore in strict LIFO order per (context, dimension).
    pub fn pop(&self, ctx: ContextId, dim: &mut Dimension) -> Result<(), EngineError> {
        let frame = {
            let mut frames = self.frames.lock().expect("snapshot lock poisoned");
            let key = (ctx.0, dim.code().to_string());
            let frame = frames.get_mut(&key).and_then(Vec::pop);
            if frames.get(&key).map(Vec::is_empty).unwrap_or(false) {
                frames.remove(&key);
            }
            frame
        };
        match frame {
            Some(status) => {
                dim.set_status_codes(status);
                Ok(())
            }
            None => Err(EngineError::MissingSnapshot {
                dimension: dim.code().to_string(),
            }),
        }
    }

    /// Discards the most recent frame without restoring it.
    pub fn discard(&self, ctx: ContextId, dim: &Dimension) -> Result<(), EngineError> {
        let mut frames = self.frames.lock().expect("snapshot lock poisoned");
        let key = (ctx.0, dim.code().to_string());
        match frames.get_mut(&key).and_then(Vec::pop) {
            Some(_) => {
                if frames.get(&key).map(Vec::is_empty).unwrap_or(false) {
                    frames.remove(&key);
                }
                Ok(())
            }
            None => Err(EngineError::MissingSnapshot {
                dimension: dim.code().to_string(),
            }),
        }
    }

    /// Runs `f` with the dimension's status saved, restoring it on every
    /// exit path. The restore error wins only when `f` itself succeeded.
    pub fn with_restored<T>(
        &self,
        ctx: ContextId,
        dim: &mut Dimension,
        f: impl FnOnce(&mut Dimension) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.push(ctx, dim);
        let result = f(dim);
        match self.pop(ctx, dim) {
            Ok(()) => result,
            Err(pop_err) => result.and(Err(pop_err)),
        }
    }

    /// Pending frame count for a context and dimension; zero once balanced.
    pub fn depth(&self, ctx: ContextId, dim: &Dimension) -> usize {
        self.frames
            .lock()
            .expect("snapshot lock poisoned")
            .get(&(ctx.0, dim.code().to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }
}
