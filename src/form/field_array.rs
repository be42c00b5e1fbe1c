use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use super::controller::{FormController, FormResult, FormState, read_lock, write_lock};
use super::registry::FieldOptions;
use super::validation::FieldRules;
use crate::diagnostics::Misuse;
use crate::id::{ItemKey, KeyRegistry};
use crate::path::{IntoPath, Path};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ArrayRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FieldArrayOptions {
    pub rules: ArrayRules,
}

/// One item as the UI should render it: `key` is stable across reorders,
/// `index` is the item's current position.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldArrayItem {
    pub key: ItemKey,
    pub index: usize,
    pub value: Value,
}

/// Key list kept parallel to the sequence at an array path.
#[derive(Debug, Default)]
pub(super) struct FieldArrayState {
    keys: Vec<ItemKey>,
    positions: HashMap<ItemKey, usize>,
    rules: ArrayRules,
}

impl FieldArrayState {
    fn new(registry: &mut KeyRegistry, len: usize, rules: ArrayRules) -> Self {
        let mut state = Self {
            keys: registry.mint_many(len),
            positions: HashMap::new(),
            rules,
        };
        state.reindex();
        state
    }

    /// Retires every key and mints a fresh set for `len` items.
    pub(super) fn remint(&mut self, registry: &mut KeyRegistry, len: usize) {
        for key in self.keys.drain(..) {
            registry.retire(&key);
        }
        self.keys = registry.mint_many(len);
        self.reindex();
    }

    /// Trims or extends the key list at the tail so it matches `len`.
    pub(super) fn resize(&mut self, registry: &mut KeyRegistry, len: usize) {
        if len < self.keys.len() {
            for key in self.keys.drain(len..) {
                registry.retire(&key);
            }
        } else {
            let missing = len - self.keys.len();
            self.keys.extend(registry.mint_many(missing));
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        self.positions = self
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| (key.clone(), index))
            .collect();
    }

    fn apply(&mut self, registry: &mut KeyRegistry, shift: &Shift, minted: Vec<ItemKey>) {
        match shift {
            Shift::Insert { at, .. } => {
                let tail = self.keys.split_off(*at);
                self.keys.extend(minted);
                self.keys.extend(tail);
            }
            Shift::Remove { indices } => {
                for index in indices.iter().rev() {
                    let key = self.keys.remove(*index);
                    registry.retire(&key);
                }
            }
            Shift::Swap(a, b) => self.keys.swap(*a, *b),
            Shift::Move { from, to } => {
                let key = self.keys.remove(*from);
                self.keys.insert(*to, key);
            }
        }
        self.reindex();
    }
}

/// How a structural edit moves item indices.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Shift {
    Insert { at: usize, count: usize },
    /// Sorted ascending, no duplicates.
    Remove { indices: Vec<usize> },
    Swap(usize, usize),
    Move { from: usize, to: usize },
}

impl Shift {
    fn remap(&self, index: usize) -> Option<usize> {
        match self {
            Shift::Insert { at, count } if index >= *at => Some(index + count),
            Shift::Insert { .. } => Some(index),
            Shift::Remove { indices } => match indices.binary_search(&index) {
                Ok(_) => None,
                Err(removed_before) => Some(index - removed_before),
            },
            Shift::Swap(a, b) if index == *a => Some(*b),
            Shift::Swap(a, b) if index == *b => Some(*a),
            Shift::Swap(..) => Some(index),
            Shift::Move { from, to } if index == *from => Some(*to),
            Shift::Move { from, to } if from < to && index > *from && index <= *to => {
                Some(index - 1)
            }
            Shift::Move { from, to } if from > to && index >= *to && index < *from => {
                Some(index + 1)
            }
            Shift::Move { .. } => Some(index),
        }
    }

    fn apply_values(&self, items: &mut Vec<Value>, inserted: Vec<Value>) {
        match self {
            Shift::Insert { at, .. } => {
                let tail = items.split_off(*at);
                items.extend(inserted);
                items.extend(tail);
            }
            Shift::Remove { indices } => {
                for index in indices.iter().rev() {
                    items.remove(*index);
                }
            }
            Shift::Swap(a, b) => items.swap(*a, *b),
            Shift::Move { from, to } => {
                let item = items.remove(*from);
                items.insert(*to, item);
            }
        }
    }
}

impl FormState {
    fn sequence_len(&self, path: &Path) -> Option<usize> {
        self.store.get(path).and_then(Value::as_array).map(Vec::len)
    }

    /// Moves every piece of per-path state under `array` along with its item.
    fn shift_array(&mut self, array: &Path, shift: &Shift, inserted: Vec<Value>) {
        let count = inserted.len();
        if let Some(items) = self.store.sequence_mut(array) {
            shift.apply_values(items, inserted);
        }
        let minted = match shift {
            Shift::Insert { .. } => self.keys.mint_many(count),
            _ => Vec::new(),
        };
        let FormState {
            field_arrays,
            keys,
            ..
        } = self;
        if let Some(state) = field_arrays.get_mut(array) {
            state.apply(keys, shift, minted);
        }

        let remap = |index| shift.remap(index);
        self.supersede_under(array);
        self.tickets
            .retain(|path, _| path.reindexed(array, remap).is_some());
        self.errors.reindex(array, remap);
        self.registry.reindex(array, remap);
        self.dirty = reindex_set(&self.dirty, array, remap);
        self.touched = reindex_set(&self.touched, array, remap);
        for (path, mut nested) in std::mem::take(&mut self.field_arrays) {
            match path.reindexed(array, remap) {
                Some(next) => {
                    self.field_arrays.insert(next, nested);
                }
                None => nested.remint(&mut self.keys, 0),
            }
        }
        self.dirty.insert(array.clone());
    }
}

fn reindex_set(
    set: &BTreeSet<Path>,
    prefix: &Path,
    remap: impl Fn(usize) -> Option<usize>,
) -> BTreeSet<Path> {
    set.iter()
        .filter_map(|path| path.reindexed(prefix, &remap))
        .collect()
}

/// Handle for ordered, keyed edits of the sequence at one path.
#[derive(Clone)]
pub struct FieldArray {
    controller: FormController,
    path: Path,
}

impl FormController {
    /// Opens the field array at `path`, creating an empty sequence when the
    /// path is absent. Array rules are registered as length rules on the path.
    pub fn field_array(
        &self,
        path: impl IntoPath,
        options: FieldArrayOptions,
    ) -> FormResult<FieldArray> {
        let path = path.into_path()?;
        let not_an_array = {
            let mut state = write_lock(&self.state, "opening field array")?;
            if state.store.get(&path).is_none() {
                state.store.set(&path, Value::Array(Vec::new()));
            }
            let len = state.sequence_len(&path);
            let FormState {
                field_arrays,
                keys,
                ..
            } = &mut *state;
            match field_arrays.get_mut(&path) {
                Some(array) => array.rules = options.rules,
                None => {
                    let array = FieldArrayState::new(keys, len.unwrap_or(0), options.rules);
                    field_arrays.insert(path.clone(), array);
                }
            }

            let mut length = FieldRules::new();
            if let Some(min) = options.rules.min_length {
                length = length.min_length(min, format!("at least {min} items required"));
            }
            if let Some(max) = options.rules.max_length {
                length = length.max_length(max, format!("at most {max} items allowed"));
            }
            if !length.is_empty() {
                // Only the length rules are owned here; anything else registered on
                // the array path is kept.
                match state.registry.get_mut(&path) {
                    Some(entry) => {
                        let rules = &mut entry.options.rules;
                        rules.min_length = length.min_length.or(rules.min_length.take());
                        rules.max_length = length.max_length.or(rules.max_length.take());
                    }
                    None => {
                        state
                            .registry
                            .register(path.clone(), FieldOptions::new().rules(length));
                    }
                }
            }
            len.is_none()
        };
        if not_an_array {
            self.warn(&Misuse::NotAnArray {
                op: "field_array",
                path: path.clone(),
            });
        }
        Ok(FieldArray {
            controller: self.clone(),
            path,
        })
    }
}

impl FieldArray {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> FormResult<usize> {
        let state = read_lock(&self.controller.state, "reading field array length")?;
        Ok(state.sequence_len(&self.path).unwrap_or(0))
    }

    pub fn is_empty(&self) -> FormResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Items in order, each with its stable key and current index.
    pub fn fields(&self) -> FormResult<Vec<FieldArrayItem>> {
        let state = read_lock(&self.controller.state, "reading field array items")?;
        let Some(array) = state.field_arrays.get(&self.path) else {
            return Ok(Vec::new());
        };
        let values = state
            .store
            .get(&self.path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(array
            .keys
            .iter()
            .zip(values)
            .enumerate()
            .map(|(index, (key, value))| FieldArrayItem {
                key: key.clone(),
                index,
                value: value.clone(),
            })
            .collect())
    }

    pub fn keys(&self) -> FormResult<Vec<ItemKey>> {
        let state = read_lock(&self.controller.state, "reading field array keys")?;
        Ok(state
            .field_arrays
            .get(&self.path)
            .map(|array| array.keys.clone())
            .unwrap_or_default())
    }

    pub fn index_of(&self, key: &ItemKey) -> FormResult<Option<usize>> {
        let state = read_lock(&self.controller.state, "reading field array index")?;
        Ok(state
            .field_arrays
            .get(&self.path)
            .and_then(|array| array.positions.get(key).copied()))
    }

    pub fn append(&self, item: Value) -> FormResult<bool> {
        self.append_all(vec![item])
    }

    pub fn append_all(&self, items: Vec<Value>) -> FormResult<bool> {
        self.insert_at("append", None, items)
    }

    pub fn prepend(&self, item: Value) -> FormResult<bool> {
        self.prepend_all(vec![item])
    }

    pub fn prepend_all(&self, items: Vec<Value>) -> FormResult<bool> {
        self.insert_at("prepend", Some(0), items)
    }

    /// Inserts at `index`, clamped into `0..=len`.
    pub fn insert(&self, index: isize, item: Value) -> FormResult<bool> {
        self.insert_all(index, vec![item])
    }

    pub fn insert_all(&self, index: isize, items: Vec<Value>) -> FormResult<bool> {
        self.insert_at("insert", Some(usize::try_from(index).unwrap_or(0)), items)
    }

    fn insert_at(&self, op: &'static str, at: Option<usize>, items: Vec<Value>) -> FormResult<bool> {
        if items.is_empty() {
            return Ok(false);
        }
        self.mutate(op, move |state, len| {
            if let Some(max) = state.rules.max_length {
                if len + items.len() > max {
                    tracing::debug!(target: "calmform", op, max, "field array at maximum length");
                    return Edit::Refused;
                }
            }
            let at = at.map_or(len, |at| at.min(len));
            Edit::Shift(
                Shift::Insert {
                    at,
                    count: items.len(),
                },
                items,
            )
        })
    }

    /// Out-of-range indices are ignored.
    pub fn remove(&self, index: usize) -> FormResult<bool> {
        self.mutate("remove", |_, len| {
            if index >= len {
                return Edit::OutOfBounds(index);
            }
            Edit::Shift(
                Shift::Remove {
                    indices: vec![index],
                },
                Vec::new(),
            )
        })
    }

    pub fn remove_many(&self, indices: impl IntoIterator<Item = usize>) -> FormResult<bool> {
        let mut indices = indices.into_iter().collect::<Vec<_>>();
        indices.sort_unstable();
        indices.dedup();
        self.mutate("remove_many", move |_, len| {
            let first_out_of_bounds = indices.iter().copied().find(|index| *index >= len);
            indices.retain(|index| *index < len);
            if indices.is_empty() {
                return match first_out_of_bounds {
                    Some(index) => Edit::OutOfBounds(index),
                    None => Edit::Refused,
                };
            }
            Edit::Shift(Shift::Remove { indices }, Vec::new())
        })
    }

    /// Empties the array unless that would go below its minimum length.
    pub fn remove_all(&self) -> FormResult<bool> {
        self.mutate("remove_all", |state, len| {
            if state.rules.min_length.is_some_and(|min| min > 0) || len == 0 {
                return Edit::Refused;
            }
            Edit::Shift(
                Shift::Remove {
                    indices: (0..len).collect(),
                },
                Vec::new(),
            )
        })
    }

    pub fn swap(&self, a: usize, b: usize) -> FormResult<bool> {
        self.mutate("swap", |_, len| {
            if a >= len {
                return Edit::OutOfBounds(a);
            }
            if b >= len {
                return Edit::OutOfBounds(b);
            }
            if a == b {
                return Edit::Refused;
            }
            Edit::Shift(Shift::Swap(a, b), Vec::new())
        })
    }

    pub fn move_item(&self, from: usize, to: usize) -> FormResult<bool> {
        self.mutate("move", |_, len| {
            if from >= len {
                return Edit::OutOfBounds(from);
            }
            if to >= len {
                return Edit::OutOfBounds(to);
            }
            if from == to {
                return Edit::Refused;
            }
            Edit::Shift(Shift::Move { from, to }, Vec::new())
        })
    }

    /// Replaces the item at `index` in place; its key is kept.
    pub fn update(&self, index: usize, item: Value) -> FormResult<bool> {
        self.mutate("update", move |_, len| {
            if index >= len {
                return Edit::OutOfBounds(index);
            }
            Edit::Update(index, item)
        })
    }

    /// Replaces the whole sequence and mints a new key for every item.
    pub fn replace(&self, items: Vec<Value>) -> FormResult<bool> {
        self.mutate("replace", move |_, _| Edit::Replace(items))
    }

    fn mutate(
        &self,
        op: &'static str,
        plan: impl FnOnce(&FieldArrayState, usize) -> Edit,
    ) -> FormResult<bool> {
        let controller = &self.controller;
        let array = &self.path;
        let misuse = {
            let mut state = write_lock(&controller.state, "editing field array")?;
            let Some(len) = state.sequence_len(array) else {
                drop(state);
                controller.warn(&Misuse::NotAnArray {
                    op,
                    path: array.clone(),
                });
                return Ok(false);
            };
            let edit = match state.field_arrays.get(array) {
                Some(tracked) => plan(tracked, len),
                None => plan(&FieldArrayState::default(), len),
            };
            match edit {
                Edit::Refused => return Ok(false),
                Edit::OutOfBounds(index) => Some(Misuse::IndexOutOfBounds {
                    op,
                    path: array.clone(),
                    index,
                    len,
                }),
                Edit::Shift(shift, inserted) => {
                    state.shift_array(array, &shift, inserted);
                    None
                }
                Edit::Update(index, item) => {
                    let item_path = array.child(index);
                    state.store.set(&item_path, item);
                    state.supersede_under(&item_path);
                    state.resync_field_arrays(&item_path);
                    state.dirty.insert(array.clone());
                    None
                }
                Edit::Replace(items) => {
                    let count = items.len();
                    state.store.set(array, Value::Array(items));
                    state.supersede_under(array);
                    state.errors.clear_under(array);
                    state.resync_field_arrays(array);
                    state.dirty.retain(|path| !path.starts_with(array));
                    state.touched.retain(|path| !path.starts_with(array));
                    state.dirty.insert(array.clone());
                    tracing::trace!(target: "calmform", path = %array, count, "field array replaced");
                    None
                }
            }
        };
        if let Some(misuse) = misuse {
            controller.warn(&misuse);
            return Ok(false);
        }
        controller.sync_elements(Some(array))?;
        controller.notify()?;
        Ok(true)
    }
}

enum Edit {
    Refused,
    OutOfBounds(usize),
    Shift(Shift, Vec<Value>),
    Update(usize, Value),
    Replace(Vec<Value>),
}
