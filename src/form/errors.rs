use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{self, Path, Seg};

pub const ROOT_ERROR_KEY: &str = "root";
pub const INTERNAL_ERROR_KIND: &str = "internal";

/// A structured field error. `types` collects every failing rule when the form
/// runs with `CriteriaMode::All`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, String>,
}

impl FieldError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            types: BTreeMap::new(),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::new("custom", message)
    }

    pub fn required(message: impl Into<String>) -> Self {
        Self::new("required", message)
    }

    /// The validator itself failed rather than reporting the value invalid.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR_KIND, message)
    }

    pub fn with_type(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.types.insert(kind.into(), message.into());
        self
    }

    pub fn is_internal(&self) -> bool {
        self.kind == INTERNAL_ERROR_KIND
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors addressed by path, iterated in path order. Form-level errors live
/// under the `root` key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorMap {
    entries: BTreeMap<Path, FieldError>,
}

impl ErrorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_path() -> Path {
        Path::root().key(ROOT_ERROR_KEY)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &Path) -> Option<&FieldError> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn set(&mut self, path: Path, error: FieldError) -> Option<FieldError> {
        self.entries.insert(path, error)
    }

    pub fn remove(&mut self, path: &Path) -> Option<FieldError> {
        self.entries.remove(path)
    }

    /// Removes the error at `path` and every error beneath it.
    pub fn clear_under(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(path));
        before != self.entries.len()
    }

    pub fn has_errors_under(&self, path: &Path) -> bool {
        self.entries.keys().any(|key| key.starts_with(path))
    }

    pub fn errors_under<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Iterator<Item = (&'a Path, &'a FieldError)> + 'a {
        self.entries.iter().filter(move |(key, _)| key.starts_with(path))
    }

    /// A copy holding only the errors at or under `path`.
    pub fn scoped(&self, path: &Path) -> ErrorMap {
        ErrorMap {
            entries: self
                .errors_under(path)
                .map(|(key, error)| (key.clone(), error.clone()))
                .collect(),
        }
    }

    pub fn merge(&mut self, other: ErrorMap) {
        self.entries.extend(other.entries);
    }

    pub fn first(&self) -> Option<(&Path, &FieldError)> {
        self.entries.iter().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FieldError)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys()
    }

    pub fn is_root_error(path: &Path) -> bool {
        matches!(path.segments().first(), Some(Seg::Key(key)) if key == ROOT_ERROR_KEY)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Path, &FieldError) -> bool) {
        self.entries.retain(|path, error| keep(path, error));
    }

    pub(crate) fn reindex(&mut self, prefix: &Path, remap: impl Fn(usize) -> Option<usize>) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .filter_map(|(path, error)| path.reindexed(prefix, &remap).map(|next| (next, error)))
            .collect();
    }

    /// A nested view shaped like the value tree.
    pub fn to_tree(&self) -> Value {
        let mut tree = Value::Object(Default::default());
        for (path, error) in &self.entries {
            if let Ok(value) = serde_json::to_value(error) {
                path::set(&mut tree, path, value);
            }
        }
        tree
    }
}

impl FromIterator<(Path, FieldError)> for ErrorMap {
    fn from_iter<I: IntoIterator<Item = (Path, FieldError)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ErrorMap {
    type Item = (Path, FieldError);
    type IntoIter = std::collections::btree_map::IntoIter<Path, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
