//! The fixed structure of a cache, used to reinterpret flat buffer lists.

use crate::error::ShapeError;
use crate::tree::{Path, StateTree};
use candle_core::Tensor;
use std::fmt;

/// Paths and per-leaf dimensions of a cache tree.
///
/// Computed once from a freshly allocated cache and shared for the whole
/// generation. Every flat value list exchanged with a compute engine is
/// ordered and checked against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheShape {
    tree: StateTree<Vec<usize>>,
}

impl CacheShape {
    /// Record the structure and leaf dimensions of `data`.
    pub fn of(data: &StateTree<Tensor>) -> Self {
        Self {
            tree: data.map(|_, tensor| tensor.dims().to_vec()),
        }
    }

    /// The shape-only tree.
    pub fn tree(&self) -> &StateTree<Vec<usize>> {
        &self.tree
    }

    /// Number of leaves a flat value list must contain.
    pub fn num_leaves(&self) -> usize {
        self.tree.num_leaves()
    }

    /// Leaf paths in flat-list order.
    pub fn paths(&self) -> Vec<Path> {
        self.tree.paths()
    }

    /// Index of `path` in the flat value list.
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.tree.ordered_leaves().position(|(leaf, _)| &leaf == path)
    }

    /// Check a flat value list against the recorded count and dimensions.
    pub fn check(&self, values: &[Tensor]) -> Result<(), ShapeError> {
        let expected = self.num_leaves();
        if values.len() != expected {
            return Err(ShapeError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }
        for ((path, dims), value) in self.tree.ordered_leaves().zip(values) {
            if value.dims() != dims.as_slice() {
                return Err(ShapeError::DimensionMismatch {
                    path,
                    expected: dims.clone(),
                    actual: value.dims().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Check `values` and rebuild them into a cache tree.
    pub fn rebuild(&self, values: Vec<Tensor>) -> Result<StateTree<Tensor>, ShapeError> {
        self.check(&values)?;
        StateTree::from_values(values, &self.tree)
    }
}

impl fmt::Display for CacheShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.tree.map(|_, dims| DisplayDims(dims.clone()));
        write!(f, "{tree}")
    }
}

struct DisplayDims(Vec<usize>);

impl fmt::Display for DisplayDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
