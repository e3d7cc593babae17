//! Resolution of the dotted paths found in the `map` field.
//!
//! A path is resolved once, against the parsed `operations`, into a [`Location`]: the concrete
//! steps leading to the container holding the placeholder, plus the key of the placeholder in
//! that container. Locations are plain data, so they can be computed before any file is
//! persisted and used afterwards to splice the results in.

use std::fmt;

use serde_json::Value;

use super::Result as UploadResult;
use super::config::ArrayIndexing;
use super::error::FileUploadError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Location {
    container: Vec<Segment>,
    key: Segment,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.container {
            write!(f, "{segment}.")?;
        }
        write!(f, "{}", self.key)
    }
}

impl Location {
    fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.container.iter().chain(std::iter::once(&self.key))
    }

    /// Whether writing at one location would also write at the other one: the locations are
    /// equal, or one of them lies inside the value at the other.
    pub(crate) fn overlaps(&self, other: &Location) -> bool {
        self.segments()
            .zip(other.segments())
            .all(|(segment, other)| segment == other)
    }

    /// Replaces the value at this location.
    ///
    /// Object keys that do not exist yet are inserted. Fails if the tree no longer has the
    /// shape it had when the location was resolved.
    pub(crate) fn assign(&self, tree: &mut Value, value: Value) -> UploadResult<()> {
        let not_found = || FileUploadError::PathNotFound(self.to_string());
        let container = self
            .container
            .iter()
            .try_fold(tree, |node, segment| match (node, segment) {
                (Value::Object(map), Segment::Key(key)) => map.get_mut(key.as_str()),
                (Value::Array(list), Segment::Index(index)) => list.get_mut(*index),
                _ => None,
            })
            .ok_or_else(not_found)?;

        match (container, &self.key) {
            (Value::Object(map), Segment::Key(key)) => {
                map.insert(key.clone(), value);
            }
            (Value::Array(list), Segment::Index(index)) => {
                *list.get_mut(*index).ok_or_else(not_found)? = value;
            }
            _ => return Err(not_found()),
        }
        Ok(())
    }
}

/// Resolves `path` against `tree`.
///
/// Every segment but the last one has to lead to an object or an array. On objects a segment
/// names the child. On arrays the segment is a decimal index with [`ArrayIndexing::Explicit`];
/// with [`ArrayIndexing::Positional`] the element at the current depth of the walk is selected
/// and the segment is consumed. The last segment is the key of the placeholder in its container.
pub(crate) fn resolve(tree: &Value, path: &str, mode: ArrayIndexing) -> UploadResult<Location> {
    let not_found = || FileUploadError::PathNotFound(path.to_string());
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(not_found());
    };
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(not_found());
    }

    let mut node = tree;
    let mut container = Vec::with_capacity(parents.len());
    for (position, segment) in parents.iter().enumerate() {
        let (step, child) = match node {
            Value::Object(map) => {
                let child = map.get(*segment).ok_or_else(not_found)?;
                (Segment::Key(segment.to_string()), child)
            }
            Value::Array(list) => {
                let index = match mode {
                    ArrayIndexing::Explicit => segment.parse::<usize>().map_err(|_| not_found())?,
                    ArrayIndexing::Positional => position,
                };
                let child = list.get(index).ok_or_else(not_found)?;
                (Segment::Index(index), child)
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                return Err(not_found());
            }
        };
        container.push(step);
        node = child;
    }

    let key = match node {
        Value::Object(_) => Segment::Key(last.to_string()),
        Value::Array(list) => {
            let index = last.parse::<usize>().map_err(|_| not_found())?;
            if index >= list.len() {
                return Err(not_found());
            }
            Segment::Index(index)
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            return Err(not_found());
        }
    };

    Ok(Location { container, key })
}
