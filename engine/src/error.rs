//! FILENAME: engine/src/error.rs
//! PURPOSE: Error types shared by every engine operation.

use thiserror::Error;

use crate::value::ValueType;

/// Error raised by the storage collaborator. Backends wrap their own
/// failures in `Backend`; the in-memory store never fails.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Error raised by the engine proper.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("dimension already exists: {0}")]
    DimensionAlreadyExists(String),

    #[error("dimension {0} is in use by at least one cube")]
    DimensionInUse(String),

    #[error("position {code} not found in dimension {dimension}")]
    PositionNotFound { dimension: String, code: String },

    #[error("position {code} already exists in dimension {dimension}")]
    PositionAlreadyExists { dimension: String, code: String },

    #[error("hierarchy {code} not found for dimension {dimension}")]
    HierarchyNotFound { dimension: String, code: String },

    #[error("hierarchy {code} already exists for dimension {dimension}")]
    HierarchyAlreadyExists { dimension: String, code: String },

    #[error("hierarchy {dimension}.{hierarchy}: linking {code} would close a cycle")]
    HierarchyCycle {
        dimension: String,
        hierarchy: String,
        code: String,
    },

    #[error("hierarchy {dimension}.{hierarchy}: no link set for {code}")]
    LinkNotFound {
        dimension: String,
        hierarchy: String,
        code: String,
    },

    #[error("cube not found: {0}")]
    CubeNotFound(String),

    #[error("cube already exists: {0}")]
    CubeAlreadyExists(String),

    #[error("formula not found: {0}")]
    FormulaNotFound(String),

    #[error("formula already exists: {0}")]
    FormulaAlreadyExists(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid cell value for {expected:?} cube: {value}")]
    InvalidCellType { expected: ValueType, value: String },

    #[error("no snapshot to restore for dimension {dimension}")]
    MissingSnapshot { dimension: String },

    #[error("cube {0} is read-only (derived from a formula)")]
    ReadOnlyCube(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
