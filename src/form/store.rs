use serde_json::Value;

use crate::path::{self, Path, SetReport};

/// The live value tree and the default tree it is compared against.
///
/// Both trees are owned; callers hand values in by value, so nothing outside
/// the store can alias or later mutate the stored defaults.
#[derive(Clone, Debug)]
pub(crate) struct ValueStore {
    values: Value,
    defaults: Value,
}

impl ValueStore {
    pub(crate) fn new(defaults: Value) -> Self {
        Self {
            values: defaults.clone(),
            defaults,
        }
    }

    pub(crate) fn get(&self, path: &Path) -> Option<&Value> {
        path::get(&self.values, path)
    }

    pub(crate) fn all(&self) -> &Value {
        &self.values
    }

    pub(crate) fn defaults(&self) -> &Value {
        &self.defaults
    }

    pub(crate) fn default_at(&self, path: &Path) -> Option<&Value> {
        path::get(&self.defaults, path)
    }

    pub(crate) fn set(&mut self, path: &Path, value: Value) -> SetReport {
        path::set(&mut self.values, path, value)
    }

    pub(crate) fn unset(&mut self, path: &Path) -> bool {
        path::unset(&mut self.values, path)
    }

    pub(crate) fn set_default(&mut self, path: &Path, value: Value) -> SetReport {
        path::set(&mut self.defaults, path, value)
    }

    pub(crate) fn unset_default(&mut self, path: &Path) -> bool {
        path::unset(&mut self.defaults, path)
    }

    pub(crate) fn sequence_mut(&mut self, path: &Path) -> Option<&mut Vec<Value>> {
        path::get_mut(&mut self.values, path).and_then(Value::as_array_mut)
    }

    pub(crate) fn replace_all(&mut self, tree: Value) {
        self.values = tree;
    }

    pub(crate) fn capture_default(&mut self, tree: Value) {
        self.defaults = tree;
    }

    pub(crate) fn reset_to_default(&mut self) {
        self.values = self.defaults.clone();
    }

    /// `null` and absent compare equal so clearing a field with no default is clean.
    pub(crate) fn is_path_dirty(&self, path: &Path) -> bool {
        let current = self.get(path).filter(|value| !value.is_null());
        let default = self.default_at(path).filter(|value| !value.is_null());
        current != default
    }
}
