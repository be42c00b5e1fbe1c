use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::binding::FieldElement;
use super::controller::{FormController, FormResult, read_lock, write_lock};
use super::validation::{FieldRules, FieldValidator};
use crate::diagnostics::Misuse;
use crate::path::{IntoPath, Path};

/// How the UI layer receives values for a field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FieldMode {
    /// The engine writes values straight into the bound element.
    #[default]
    Uncontrolled,
    /// The UI reads values from snapshots.
    Controlled,
}

#[derive(Clone, Debug, Default)]
pub struct FieldOptions {
    pub rules: FieldRules,
    pub validate: Option<FieldValidator>,
    pub debounce: Duration,
    /// Paths re-validated whenever this field is validated by an event.
    pub deps: Vec<Path>,
    pub disabled: bool,
    /// Overrides `FormOptions::should_unregister` for this field.
    pub should_unregister: Option<bool>,
    pub mode: FieldMode,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn validate(mut self, validator: FieldValidator) -> Self {
        self.validate = Some(validator);
        self
    }

    pub fn debounce_ms(mut self, millis: u64) -> Self {
        self.debounce = Duration::from_millis(millis);
        self
    }

    pub fn dep(mut self, path: impl IntoPath) -> Self {
        match path.into_path() {
            Ok(path) => self.deps.push(path),
            Err(error) => tracing::warn!(target: "calmform", %error, "ignoring malformed dependency path"),
        }
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn should_unregister(mut self, should_unregister: bool) -> Self {
        self.should_unregister = Some(should_unregister);
        self
    }

    pub fn controlled(mut self) -> Self {
        self.mode = FieldMode::Controlled;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UnregisterOptions {
    pub keep_value: bool,
    pub keep_error: bool,
    pub keep_dirty: bool,
    pub keep_touched: bool,
    pub keep_default_value: bool,
}

pub(super) struct FieldEntry {
    pub(super) options: FieldOptions,
    pub(super) element: Option<Arc<dyn FieldElement>>,
    order: u64,
}

#[derive(Default)]
pub(super) struct FieldRegistry {
    entries: BTreeMap<Path, FieldEntry>,
    next_order: u64,
}

impl FieldRegistry {
    /// Registers or updates a field. Re-registering keeps the bound element and
    /// the original registration order.
    pub(super) fn register(&mut self, path: Path, options: FieldOptions) -> bool {
        if let Some(entry) = self.entries.get_mut(&path) {
            entry.options = options;
            return false;
        }
        self.next_order += 1;
        self.entries.insert(
            path,
            FieldEntry {
                options,
                element: None,
                order: self.next_order,
            },
        );
        true
    }

    pub(super) fn unregister(&mut self, path: &Path) -> Option<FieldEntry> {
        self.entries.remove(path)
    }

    pub(super) fn get(&self, path: &Path) -> Option<&FieldEntry> {
        self.entries.get(path)
    }

    pub(super) fn get_mut(&mut self, path: &Path) -> Option<&mut FieldEntry> {
        self.entries.get_mut(path)
    }

    pub(super) fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub(super) fn is_disabled(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| entry.options.disabled)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = (&Path, &FieldEntry)> {
        self.entries.iter()
    }

    pub(super) fn paths_in_order(&self) -> Vec<Path> {
        let mut entries = self.entries.iter().collect::<Vec<_>>();
        entries.sort_by_key(|(_, entry)| entry.order);
        entries.into_iter().map(|(path, _)| path.clone()).collect()
    }

    pub(super) fn reindex(&mut self, prefix: &Path, remap: impl Fn(usize) -> Option<usize>) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .filter_map(|(path, entry)| path.reindexed(prefix, &remap).map(|next| (next, entry)))
            .collect();
    }
}

impl FormController {
    pub fn register(&self, path: impl IntoPath, options: FieldOptions) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        let unknown = {
            let mut state = write_lock(&self.state, "registering field")?;
            let unknown =
                state.store.get(&path).is_none() && state.store.default_at(&path).is_none();
            if state.registry.register(path.clone(), options) {
                tracing::trace!(target: "calmform", %path, "field registered");
            }
            unknown
        };
        if unknown {
            self.warn(&Misuse::UnknownPath { path });
        }
        Ok(())
    }

    pub fn is_registered(&self, path: impl IntoPath) -> FormResult<bool> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(false);
        };
        Ok(read_lock(&self.state, "reading field registry")?
            .registry
            .contains(&path))
    }

    /// Registered paths in registration order.
    pub fn registered_paths(&self) -> FormResult<Vec<Path>> {
        Ok(read_lock(&self.state, "reading field registry")?
            .registry
            .paths_in_order())
    }

    /// Explicitly removes a field and, unless kept, its value and state.
    pub fn unregister(&self, path: impl IntoPath, options: UnregisterOptions) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        {
            let mut state = write_lock(&self.state, "unregistering field")?;
            state.registry.unregister(&path);
            state.supersede_under(&path);
            if !options.keep_value {
                state.store.unset(&path);
                state.resync_field_arrays(&path);
            }
            if !options.keep_default_value {
                state.store.unset_default(&path);
            }
            if !options.keep_error {
                state.errors.clear_under(&path);
            }
            if !options.keep_dirty {
                state.dirty.retain(|tracked| !tracked.starts_with(&path));
            }
            if !options.keep_touched {
                state.touched.retain(|tracked| !tracked.starts_with(&path));
            }
        }
        self.notify()
    }

    /// The UI element for `path` went away. Whether the value goes with it is
    /// decided by the field's `should_unregister`, falling back to the form's.
    pub fn detach_field(&self, path: impl IntoPath) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        let should_unregister = {
            let mut state = write_lock(&self.state, "detaching field")?;
            let Some(entry) = state.registry.get_mut(&path) else {
                return Ok(());
            };
            entry.element = None;
            entry
                .options
                .should_unregister
                .unwrap_or(self.options.should_unregister)
        };
        if should_unregister {
            self.unregister(
                &path,
                UnregisterOptions {
                    keep_default_value: true,
                    ..UnregisterOptions::default()
                },
            )
        } else {
            Ok(())
        }
    }
}
