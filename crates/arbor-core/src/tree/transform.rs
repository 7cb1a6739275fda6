//! Structure-preserving transforms: mapping, flattening and rebuilding.

use super::{Path, StateTree};
use crate::error::ShapeError;
use std::convert::Infallible;
use std::fmt;

impl<T> StateTree<T> {
    /// Build a tree of the same structure with every leaf replaced by
    /// `f(path, value)`.
    ///
    /// `f` is called in [`ordered_leaves`](Self::ordered_leaves) order. A bare
    /// leaf maps to a bare leaf, called with the root path.
    pub fn map<U, F>(&self, mut f: F) -> StateTree<U>
    where
        F: FnMut(&Path, &T) -> U,
    {
        match self.try_map(|path, value| Ok::<_, Infallible>(f(path, value))) {
            Ok(tree) => tree,
            Err(never) => match never {},
        }
    }

    /// Fallible [`map`](Self::map). Stops at the first error.
    pub fn try_map<U, E, F>(&self, mut f: F) -> Result<StateTree<U>, E>
    where
        F: FnMut(&Path, &T) -> Result<U, E>,
    {
        let mut path = Path::root();
        try_map_node(self, &mut path, &mut f)
    }

    /// Owning [`map`](Self::map).
    pub fn map_into<U, F>(self, mut f: F) -> StateTree<U>
    where
        F: FnMut(&Path, T) -> U,
    {
        let mut path = Path::root();
        map_into_node(self, &mut path, &mut f)
    }

    /// Consume the tree, returning its values in
    /// [`ordered_leaves`](Self::ordered_leaves) order.
    pub fn into_values(self) -> Vec<T> {
        let mut out = Vec::new();
        collect_values(self, &mut out);
        out
    }

    /// Consume the tree, returning `(path, value)` pairs in
    /// [`ordered_leaves`](Self::ordered_leaves) order.
    pub fn into_leaves(self) -> Vec<(Path, T)> {
        self.map_into(|path, value| (path.clone(), value))
            .into_values()
    }

    /// Rebuild a tree with the structure of `template`, filling its leaves
    /// from `values` in the template's ordered-leaf order.
    ///
    /// The template's own leaf values are ignored, so any instantiation of
    /// the same structure works, including a shape-only tree.
    pub fn from_values<U, I>(values: I, template: &StateTree<U>) -> Result<Self, ShapeError>
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        let expected = template.num_leaves();
        let actual = values.len();
        if actual != expected {
            return Err(ShapeError::LengthMismatch { expected, actual });
        }

        let mut values = values.into_iter();
        template.try_map(|_, _| {
            values
                .next()
                .ok_or(ShapeError::LengthMismatch { expected, actual })
        })
    }
}

fn try_map_node<T, U, E, F>(
    node: &StateTree<T>,
    path: &mut Path,
    f: &mut F,
) -> Result<StateTree<U>, E>
where
    F: FnMut(&Path, &T) -> Result<U, E>,
{
    match node {
        StateTree::Leaf(value) => Ok(StateTree::Leaf(f(path, value)?)),
        StateTree::Branch(children) => {
            let mut mapped = std::collections::BTreeMap::new();
            for (name, child) in children {
                path.push(name);
                let result = try_map_node(child, path, f);
                path.pop();
                mapped.insert(name.clone(), result?);
            }
            Ok(StateTree::Branch(mapped))
        }
    }
}

fn map_into_node<T, U, F>(node: StateTree<T>, path: &mut Path, f: &mut F) -> StateTree<U>
where
    F: FnMut(&Path, T) -> U,
{
    match node {
        StateTree::Leaf(value) => StateTree::Leaf(f(path, value)),
        StateTree::Branch(children) => StateTree::Branch(
            children
                .into_iter()
                .map(|(name, child)| {
                    path.push(&name);
                    let mapped = map_into_node(child, path, f);
                    path.pop();
                    (name, mapped)
                })
                .collect(),
        ),
    }
}

fn collect_values<T>(node: StateTree<T>, out: &mut Vec<T>) {
    match node {
        StateTree::Leaf(value) => out.push(value),
        StateTree::Branch(children) => {
            for (_, child) in children {
                collect_values(child, out);
            }
        }
    }
}

impl<T: fmt::Display> fmt::Display for StateTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, "/", self, 0)
    }
}

fn write_node<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    node: &StateTree<T>,
    depth: usize,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    match node {
        StateTree::Leaf(value) => writeln!(f, "{indent}{name:?}: {value}"),
        StateTree::Branch(children) => {
            writeln!(f, "{indent}{name:?}: {{")?;
            for (child_name, child) in children {
                write_node(f, child_name, child, depth + 1)?;
            }
            writeln!(f, "{indent}}}")
        }
    }
}
