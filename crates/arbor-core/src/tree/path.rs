//! Paths addressing nodes of a [`StateTree`](super::StateTree).

use std::fmt;

/// Ordered sequence of names from the root of a tree to one of its nodes.
///
/// The empty path addresses the root itself. Empty segments are dropped on
/// construction, so `["a", "", "b"]` and `["a", "b"]` are the same path.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<String>);

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments, skipping empty ones.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .filter(|s| !s.as_ref().is_empty())
                .map(|s| s.as_ref().to_owned())
                .collect(),
        )
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments of the path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last segment, `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Append a segment. Empty segments are ignored.
    pub fn push(&mut self, segment: impl AsRef<str>) {
        let segment = segment.as_ref();
        if !segment.is_empty() {
            self.0.push(segment.to_owned());
        }
    }

    /// Remove the last segment.
    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }

    /// New path with `segment` appended.
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.0.join("/"))
    }
}

impl<S: AsRef<str>, const N: usize> From<[S; N]> for Path {
    fn from(segments: [S; N]) -> Self {
        Self::new(segments)
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Self::new(segments)
    }
}

impl From<&[&str]> for Path {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl IntoIterator for Path {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
