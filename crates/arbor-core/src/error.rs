//! Error types for Arbor Core.

use crate::tree::Path;
use thiserror::Error;

/// Result type alias for Arbor operations.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Structural misuse of a [`StateTree`](crate::tree::StateTree) during insertion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    /// A path segment tried to descend through an existing leaf.
    #[error("cannot create path {path} through an existing leaf")]
    LeafAsBranch {
        /// Path up to and including the offending leaf.
        path: Path,
    },

    /// The target of an insertion already has children.
    #[error("cannot set a value on branch {path}, it already has children")]
    BranchAsLeaf {
        /// Path of the branch.
        path: Path,
    },
}

/// Failed lookup in a [`StateTree`](crate::tree::StateTree).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// A segment of the path does not exist.
    #[error("no node at {path}")]
    Missing {
        /// Path up to the first missing segment.
        path: Path,
    },

    /// A leaf was reached before the path was exhausted.
    #[error("path runs through leaf {path}")]
    ThroughLeaf {
        /// Path of the leaf that truncated the lookup.
        path: Path,
    },

    /// The path ends on a branch where a value was expected.
    #[error("{path} is a branch, not a leaf")]
    NotALeaf {
        /// Path of the branch.
        path: Path,
    },
}

/// Disagreement between a flat value list and the tree shape it should fill.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Number of values differs from the number of template leaves.
    #[error("expected {expected} leaf values, got {actual}")]
    LengthMismatch {
        /// Leaves in the template.
        expected: usize,
        /// Values supplied.
        actual: usize,
    },

    /// A leaf buffer has different dimensions than the recorded shape.
    #[error("leaf {path} has dims {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        /// Path of the leaf.
        path: Path,
        /// Recorded dimensions.
        expected: Vec<usize>,
        /// Dimensions received.
        actual: Vec<usize>,
    },

    /// A single cache write is longer than the whole cache.
    #[error("write of {write_len} steps exceeds cache capacity {capacity}")]
    WriteTooLong {
        /// Requested write length.
        write_len: usize,
        /// Cache capacity.
        capacity: usize,
    },
}

/// Failure reported by a [`ComputeEngine`](crate::engine::ComputeEngine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine ran out of memory for this step.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Any other failure inside the engine.
    #[error("compute failed: {0}")]
    Compute(String),

    /// The engine could not reinterpret the cache it was handed.
    #[error("engine shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Errors that can occur in Arbor operations.
#[derive(Error, Debug)]
pub enum ArborError {
    /// Invalid tree insertion.
    #[error("structure error: {0}")]
    Structure(#[from] StructureError),

    /// Invalid tree lookup.
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Flat values and tree shape disagree.
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Compute engine failure, propagated unchanged.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Invalid model or decode configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Invalid caller input (empty batch, bad prompt).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tokenizer error.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}

impl From<ArborError> for EngineError {
    fn from(err: ArborError) -> Self {
        match err {
            ArborError::TensorError(e) => EngineError::Tensor(e),
            ArborError::Shape(e) => EngineError::Shape(e),
            ArborError::Engine(e) => e,
            other => EngineError::Compute(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_error_names_the_path() {
        let err = StructureError::LeafAsBranch {
            path: Path::from(["b", "x"]),
        };
        assert_eq!(
            err.to_string(),
            "cannot create path b/x through an existing leaf"
        );
    }

    #[test]
    fn engine_error_passes_through_unchanged() {
        let inner = EngineError::OutOfMemory("kv buffers".into());
        let err: ArborError = inner.into();
        let back: EngineError = err.into();
        assert!(matches!(back, EngineError::OutOfMemory(msg) if msg == "kv buffers"));
    }

    #[test]
    fn shape_error_converts_into_arbor_error() {
        let err: ArborError = ShapeError::LengthMismatch {
            expected: 3,
            actual: 2,
        }
        .into();
        assert!(matches!(
            err,
            ArborError::Shape(ShapeError::LengthMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
