//! Named, hierarchical state containers.
//!
//! A [`StateTree`] holds values at the leaves of a tree whose branches are
//! keyed by name. It is the storage behind the rotating KV cache and behind
//! model parameters, and it is what lets the decode loop hand a flat list of
//! buffers to a compute engine and get a structured cache back.
//!
//! # Overview
//!
//! - Insertion is path based ([`StateTree::set`]) and never prunes.
//! - [`StateTree::ordered_leaves`] visits siblings in ascending name order, so
//!   flattening two trees of the same structure always lines up.
//! - [`StateTree::from_values`] rebuilds a tree from a flat list and a
//!   template of the same structure.
//!
//! # Example
//!
//! ```rust
//! use arbor_core::tree::{Path, StateTree};
//!
//! let mut tree = StateTree::new_branch();
//! tree.set(["a"], 1).unwrap();
//! tree.set(["b", "y"], 3).unwrap();
//! tree.set(["b", "x"], 2).unwrap();
//!
//! let order: Vec<String> = tree.paths().iter().map(Path::to_string).collect();
//! assert_eq!(order, ["a", "b/x", "b/y"]);
//!
//! // Flatten, transform and rebuild.
//! let doubled: Vec<i32> = tree.values().into_iter().map(|v| v * 2).collect();
//! let rebuilt = StateTree::from_values(doubled, &tree).unwrap();
//! assert_eq!(rebuilt.get(["b", "y"]).unwrap(), &6);
//! ```

mod iter;
mod node;
mod path;
mod transform;

pub use iter::{Leaves, OrderedLeaves};
pub use node::StateTree;
pub use path::Path;
