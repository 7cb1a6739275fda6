//! Leaf traversal.

use super::{Path, StateTree};

/// Iterator over `(path, value)` pairs of every leaf, in no particular order.
///
/// Created by [`StateTree::leaves`].
pub struct Leaves<'a, T> {
    stack: Vec<(Path, &'a StateTree<T>)>,
}

impl<'a, T> Iterator for Leaves<'a, T> {
    type Item = (Path, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, node)) = self.stack.pop() {
            match node {
                StateTree::Leaf(value) => return Some((path, value)),
                StateTree::Branch(children) => {
                    for (name, child) in children {
                        self.stack.push((path.child(name), child));
                    }
                }
            }
        }
        None
    }
}

/// Iterator over `(path, value)` pairs of every leaf, siblings visited in
/// ascending name order at every level.
///
/// Two trees with the same structure always yield their leaves in the same
/// order, which is what flattening and rebuilding rely on. Created by
/// [`StateTree::ordered_leaves`].
pub struct OrderedLeaves<'a, T> {
    stack: Vec<(Path, &'a StateTree<T>)>,
}

impl<'a, T> Iterator for OrderedLeaves<'a, T> {
    type Item = (Path, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, node)) = self.stack.pop() {
            match node {
                StateTree::Leaf(value) => return Some((path, value)),
                StateTree::Branch(children) => {
                    // Reverse push so the smallest name is popped first.
                    for (name, child) in children.iter().rev() {
                        self.stack.push((path.child(name), child));
                    }
                }
            }
        }
        None
    }
}

impl<T> StateTree<T> {
    /// Iterate over all leaves. Order is unspecified.
    pub fn leaves(&self) -> Leaves<'_, T> {
        Leaves {
            stack: vec![(Path::root(), self)],
        }
    }

    /// Iterate over all leaves in deterministic, name-sorted order.
    pub fn ordered_leaves(&self) -> OrderedLeaves<'_, T> {
        OrderedLeaves {
            stack: vec![(Path::root(), self)],
        }
    }

    /// Number of leaves in the tree.
    pub fn num_leaves(&self) -> usize {
        self.leaves().count()
    }

    /// Paths of all leaves, in the order of [`ordered_leaves`](Self::ordered_leaves).
    pub fn paths(&self) -> Vec<Path> {
        self.ordered_leaves().map(|(path, _)| path).collect()
    }

    /// References to all leaf values, in the order of
    /// [`ordered_leaves`](Self::ordered_leaves).
    pub fn values(&self) -> Vec<&T> {
        self.ordered_leaves().map(|(_, value)| value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn create_test_tree() -> StateTree<i32> {
        let mut tree = StateTree::new_branch();
        tree.set(["a"], 1).unwrap();
        tree.set(["b", "y"], 3).unwrap();
        tree.set(["b", "x"], 2).unwrap();
        tree
    }

    #[test]
    fn ordered_leaves_sorts_siblings() {
        let tree = create_test_tree();
        let leaves: Vec<(String, i32)> = tree
            .ordered_leaves()
            .map(|(path, value)| (path.to_string(), *value))
            .collect();

        assert_eq!(
            leaves,
            vec![
                ("a".to_string(), 1),
                ("b/x".to_string(), 2),
                ("b/y".to_string(), 3),
            ]
        );
    }

    #[test]
    fn leaves_visits_every_leaf_once() {
        let tree = create_test_tree();
        let seen: BTreeSet<Path> = tree.leaves().map(|(path, _)| path).collect();

        assert_eq!(seen.len(), 3);
        assert_eq!(tree.num_leaves(), 3);
        assert!(seen.contains(&Path::from(["b", "x"])));
    }

    #[test]
    fn bare_leaf_has_root_path() {
        let tree = StateTree::new_leaf("only");
        let leaves: Vec<_> = tree.ordered_leaves().collect();

        assert_eq!(leaves, vec![(Path::root(), &"only")]);
    }

    #[test]
    fn empty_branch_has_no_leaves() {
        let tree: StateTree<i32> = StateTree::new_branch();
        assert_eq!(tree.num_leaves(), 0);
        assert!(tree.values().is_empty());
    }

    #[test]
    fn values_follow_ordered_paths() {
        let tree = create_test_tree();
        assert_eq!(tree.values(), vec![&1, &2, &3]);
        assert_eq!(
            tree.paths(),
            vec![
                Path::from(["a"]),
                Path::from(["b", "x"]),
                Path::from(["b", "y"]),
            ]
        );
    }
}
