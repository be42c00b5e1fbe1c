//! Dot-notation paths into a `serde_json::Value` tree.
//!
//! A path such as `user.addresses.0.street` is a sequence of segments. Purely
//! numeric segments without a leading zero address sequence items; everything
//! else (including `007`) is a record key.
//! The traversal helpers never panic: reads return `None` on any missing or
//! non-container intermediate, writes create containers on the way down, and
//! `unset` is a tolerant no-op when the route does not exist.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single segment in a path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Seg {
    /// Record key access.
    Key(String),
    /// Sequence index access.
    Index(usize),
}

impl Seg {
    fn parse(raw: &str) -> Self {
        let canonical = raw == "0" || !raw.starts_with('0');
        if canonical && !raw.is_empty() && raw.bytes().all(|byte| byte.is_ascii_digit()) {
            if let Ok(index) = raw.parse::<usize>() {
                return Seg::Index(index);
            }
        }
        Seg::Key(raw.to_owned())
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Seg::Key(_) => None,
            Seg::Index(index) => Some(*index),
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Key(key) => f.write_str(key),
            Seg::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Seg {
    fn from(value: &str) -> Self {
        Seg::Key(value.to_owned())
    }
}

impl From<String> for Seg {
    fn from(value: String) -> Self {
        Seg::Key(value)
    }
}

impl From<usize> for Seg {
    fn from(value: usize) -> Self {
        Seg::Index(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path `{path}` has an empty segment at position {position}")]
    EmptySegment { path: String, position: usize },
}

/// An address into a value tree. The empty path addresses the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Path(Vec<Seg>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses dot notation. Empty input and empty segments (`a..b`, `a.`) are rejected.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        raw.split('.')
            .enumerate()
            .map(|(position, segment)| {
                if segment.is_empty() {
                    Err(PathError::EmptySegment {
                        path: raw.to_owned(),
                        position,
                    })
                } else {
                    Ok(Seg::parse(segment))
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn from_segments(segments: Vec<Seg>) -> Self {
        Self(segments)
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(Seg::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(Seg::Index(index));
        self
    }

    pub fn child(&self, seg: impl Into<Seg>) -> Self {
        let mut next = self.clone();
        next.0.push(seg.into());
        next
    }

    pub fn join(&self, other: &Path) -> Self {
        let mut next = self.clone();
        next.0.extend(other.0.iter().cloned());
        next
    }

    pub fn push(&mut self, seg: Seg) {
        self.0.push(seg);
    }

    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Seg> {
        self.0.last()
    }

    pub fn parent(&self) -> Option<Path> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    /// True when `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// True when either path contains the other.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seg> {
        self.0.iter()
    }

    /// The sequence index directly below `prefix`, if this path descends through one.
    pub fn index_under(&self, prefix: &Path) -> Option<usize> {
        if !self.starts_with(prefix) {
            return None;
        }
        self.0.get(prefix.len()).and_then(Seg::as_index)
    }

    /// Replaces the index segment directly below `prefix`.
    pub fn with_index_under(&self, prefix: &Path, index: usize) -> Path {
        let mut next = self.clone();
        if let Some(seg) = next.0.get_mut(prefix.len()) {
            *seg = Seg::Index(index);
        }
        next
    }

    /// Rewrites the item index under `prefix` through `remap`. Paths outside the
    /// array are returned unchanged; `None` means the item no longer exists.
    pub fn reindexed(&self, prefix: &Path, remap: impl Fn(usize) -> Option<usize>) -> Option<Path> {
        match self.index_under(prefix) {
            Some(index) => remap(index).map(|next| self.with_index_under(prefix, next)),
            None => Some(self.clone()),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, seg) in self.0.iter().enumerate() {
            if position > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl TryFrom<&str> for Path {
    type Error = PathError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

impl FromIterator<Seg> for Path {
    fn from_iter<I: IntoIterator<Item = Seg>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Anything the controller accepts as an address.
pub trait IntoPath {
    fn into_path(self) -> Result<Path, PathError>;
}

impl IntoPath for Path {
    fn into_path(self) -> Result<Path, PathError> {
        Ok(self)
    }
}

impl IntoPath for &Path {
    fn into_path(self) -> Result<Path, PathError> {
        Ok(self.clone())
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Result<Path, PathError> {
        Path::parse(self)
    }
}

impl IntoPath for String {
    fn into_path(self) -> Result<Path, PathError> {
        Path::parse(&self)
    }
}

impl IntoPath for &String {
    fn into_path(self) -> Result<Path, PathError> {
        Path::parse(self)
    }
}

/// Builds a `Path` from segments: string literals become keys, integers indices.
#[macro_export]
macro_rules! path {
    () => {
        $crate::path::Path::root()
    };
    ($($seg:expr),+ $(,)?) => {{
        let mut path = $crate::path::Path::root();
        $(
            path.push($crate::path::Seg::from($seg));
        )+
        path
    }};
}

/// What a `set` had to destroy to keep the write total.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetReport {
    /// Intermediate locations that held a primitive (or a container of the wrong
    /// kind) and were replaced by a fresh container.
    pub overwritten: Vec<Path>,
}

fn step<'a>(node: &'a Value, seg: &Seg) -> Option<&'a Value> {
    match (node, seg) {
        (Value::Object(map), Seg::Key(key)) => map.get(key),
        (Value::Object(map), Seg::Index(index)) => map.get(&index.to_string()),
        (Value::Array(items), Seg::Index(index)) => items.get(*index),
        _ => None,
    }
}

fn step_mut<'a>(node: &'a mut Value, seg: &Seg) -> Option<&'a mut Value> {
    match (node, seg) {
        (Value::Object(map), Seg::Key(key)) => map.get_mut(key),
        (Value::Object(map), Seg::Index(index)) => map.get_mut(&index.to_string()),
        (Value::Array(items), Seg::Index(index)) => items.get_mut(*index),
        _ => None,
    }
}

pub fn get<'a>(tree: &'a Value, path: &Path) -> Option<&'a Value> {
    path.iter().try_fold(tree, step)
}

pub fn get_mut<'a>(tree: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    path.iter().try_fold(tree, step_mut)
}

/// Writes `value` at `path`, creating records for key segments and sequences for
/// index segments. Sequences are padded with `null` up to the written index.
pub fn set(tree: &mut Value, path: &Path, value: Value) -> SetReport {
    let mut report = SetReport::default();
    let mut walked = Path::root();
    let mut node = tree;
    for seg in path.iter() {
        prepare_container(node, seg, &walked, &mut report);
        node = slot_mut(node, seg);
        walked.push(seg.clone());
    }
    *node = value;
    report
}

fn prepare_container(node: &mut Value, seg: &Seg, walked: &Path, report: &mut SetReport) {
    let fits = matches!(
        (&*node, seg),
        (Value::Object(_), _) | (Value::Array(_), Seg::Index(_))
    );
    if fits {
        return;
    }
    if !node.is_null() {
        report.overwritten.push(walked.clone());
    }
    *node = match seg {
        Seg::Key(_) => Value::Object(Map::new()),
        Seg::Index(_) => Value::Array(Vec::new()),
    };
}

fn slot_mut<'a>(node: &'a mut Value, seg: &Seg) -> &'a mut Value {
    match (node, seg) {
        (Value::Object(map), Seg::Key(key)) => map.entry(key.clone()).or_insert(Value::Null),
        (Value::Object(map), Seg::Index(index)) => {
            map.entry(index.to_string()).or_insert(Value::Null)
        }
        (Value::Array(items), Seg::Index(index)) => {
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            &mut items[*index]
        }
        // prepare_container already made the node fit the segment.
        (node, _) => node,
    }
}

/// Deletes the leaf at `path`. Returns whether anything was removed.
///
/// Record entries are removed outright. Sequence items become `null` so that
/// sibling indices stay put and a second call is a no-op.
pub fn unset(tree: &mut Value, path: &Path) -> bool {
    let Some((last, parents)) = path.segments().split_last() else {
        return false;
    };
    let Some(parent) = parents.iter().try_fold(tree, step_mut) else {
        return false;
    };
    match (parent, last) {
        (Value::Object(map), Seg::Key(key)) => map.shift_remove(key).is_some(),
        (Value::Object(map), Seg::Index(index)) => map.shift_remove(&index.to_string()).is_some(),
        (Value::Array(items), Seg::Index(index)) => match items.get_mut(*index) {
            Some(slot) if !slot.is_null() => {
                *slot = Value::Null;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// Empty means "nothing entered": absent, `null`, `""` or an empty sequence.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}
