//! The state tree node type and path-based access.

use super::Path;
use crate::error::{LookupError, StructureError};
use std::collections::BTreeMap;

/// A hierarchical, path-addressed container.
///
/// Every node is either a leaf holding one value or a branch holding named
/// children, never both. Children are kept in a `BTreeMap`, so traversal of
/// siblings in name order needs no extra sorting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTree<T> {
    /// A single value.
    Leaf(T),
    /// Named children.
    Branch(BTreeMap<String, StateTree<T>>),
}

impl<T> StateTree<T> {
    /// Create an empty branch.
    pub fn new_branch() -> Self {
        StateTree::Branch(BTreeMap::new())
    }

    /// Create a single leaf.
    pub fn new_leaf(value: T) -> Self {
        StateTree::Leaf(value)
    }

    /// Check if this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, StateTree::Leaf(_))
    }

    /// Check if this node is a branch.
    pub fn is_branch(&self) -> bool {
        matches!(self, StateTree::Branch(_))
    }

    /// Value of a leaf node.
    pub fn value(&self) -> Option<&T> {
        match self {
            StateTree::Leaf(value) => Some(value),
            StateTree::Branch(_) => None,
        }
    }

    /// Children of a branch node.
    pub fn children(&self) -> Option<&BTreeMap<String, StateTree<T>>> {
        match self {
            StateTree::Leaf(_) => None,
            StateTree::Branch(children) => Some(children),
        }
    }

    /// Insert `value` at `path`, creating intermediate branches as needed.
    ///
    /// Empty segments are skipped. An existing leaf at `path` is overwritten;
    /// an empty branch at `path` is turned into the leaf. On error the tree
    /// is left untouched: new nodes are only created past the last existing
    /// node, and nothing below a freshly created node can fail.
    pub fn set<I, S>(&mut self, path: I, value: T) -> Result<(), StructureError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut walked = Path::root();
        let mut node = self;

        for segment in path {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            let children = match node {
                StateTree::Leaf(_) => return Err(StructureError::LeafAsBranch { path: walked }),
                StateTree::Branch(children) => children,
            };
            walked.push(segment);
            node = children
                .entry(segment.to_owned())
                .or_insert_with(StateTree::new_branch);
        }

        match node {
            StateTree::Branch(children) if !children.is_empty() => {
                Err(StructureError::BranchAsLeaf { path: walked })
            }
            _ => {
                *node = StateTree::Leaf(value);
                Ok(())
            }
        }
    }

    /// Node (leaf or branch) at `path`.
    pub fn subtree<I, S>(&self, path: I) -> Result<&StateTree<T>, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut walked = Path::root();
        let mut node = self;

        for segment in path {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            let children = match node {
                StateTree::Leaf(_) => return Err(LookupError::ThroughLeaf { path: walked }),
                StateTree::Branch(children) => children,
            };
            walked.push(segment);
            node = match children.get(segment) {
                Some(child) => child,
                None => return Err(LookupError::Missing { path: walked }),
            };
        }

        Ok(node)
    }

    /// Mutable node (leaf or branch) at `path`.
    pub fn subtree_mut<I, S>(&mut self, path: I) -> Result<&mut StateTree<T>, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut walked = Path::root();
        let mut node = self;

        for segment in path {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            let children = match node {
                StateTree::Leaf(_) => return Err(LookupError::ThroughLeaf { path: walked }),
                StateTree::Branch(children) => children,
            };
            walked.push(segment);
            node = match children.get_mut(segment) {
                Some(child) => child,
                None => return Err(LookupError::Missing { path: walked }),
            };
        }

        Ok(node)
    }

    /// Value of the leaf at `path`.
    pub fn get<I, S>(&self, path: I) -> Result<&T, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = Path::new(path);
        match self.subtree(&path)? {
            StateTree::Leaf(value) => Ok(value),
            StateTree::Branch(_) => Err(LookupError::NotALeaf { path }),
        }
    }

    /// Mutable value of the leaf at `path`.
    pub fn get_mut<I, S>(&mut self, path: I) -> Result<&mut T, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = Path::new(path);
        match self.subtree_mut(&path)? {
            StateTree::Leaf(value) => Ok(value),
            StateTree::Branch(_) => Err(LookupError::NotALeaf { path }),
        }
    }
}

impl<T> Default for StateTree<T> {
    fn default() -> Self {
        Self::new_branch()
    }
}
