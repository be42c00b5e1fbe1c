use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::controller::{FormController, FormResult, FormState, read_lock, write_lock};
use super::errors::{ErrorMap, FieldError};
use crate::path::{self, IntoPath, Path};

/// Read-only view of the whole form, derived from the engine state on demand.
#[derive(Clone, Debug, PartialEq)]
pub struct FormSnapshot {
    pub values: Value,
    pub default_values: Value,
    pub errors: ErrorMap,
    pub dirty_fields: BTreeSet<Path>,
    pub touched_fields: BTreeSet<Path>,
    pub validating_fields: BTreeSet<Path>,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub is_validating: bool,
    pub is_submitting: bool,
    pub is_submitted: bool,
    pub is_submit_successful: bool,
    pub submit_count: u32,
    pub is_loading: bool,
    pub default_values_error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldState {
    pub is_dirty: bool,
    pub is_touched: bool,
    pub invalid: bool,
    pub is_validating: bool,
    pub error: Option<FieldError>,
}

/// Dirty is the tracked set only: a form is dirty iff some mutation left a path
/// whose value differs from its default.
pub(super) fn project(state: &FormState) -> FormSnapshot {
    FormSnapshot {
        values: state.store.all().clone(),
        default_values: state.store.defaults().clone(),
        errors: state.errors.clone(),
        dirty_fields: state.dirty.clone(),
        touched_fields: state.touched.clone(),
        validating_fields: state.validating.clone(),
        is_dirty: !state.dirty.is_empty(),
        is_valid: state.errors.is_empty(),
        is_validating: !state.validating.is_empty(),
        is_submitting: state.submit.is_submitting,
        is_submitted: state.submit.is_submitted,
        is_submit_successful: state.submit.is_submit_successful,
        submit_count: state.submit.submit_count,
        is_loading: state.is_loading,
        default_values_error: state.default_values_error.clone(),
    }
}

pub(super) fn project_field(state: &FormState, path: &Path) -> FieldState {
    let under = |set: &BTreeSet<Path>| set.iter().any(|tracked| tracked.starts_with(path));
    FieldState {
        is_dirty: under(&state.dirty),
        is_touched: under(&state.touched),
        invalid: state.errors.has_errors_under(path),
        is_validating: under(&state.validating),
        error: state.errors.get(path).cloned(),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(u64);

pub(super) type Subscriber = Arc<dyn Fn(&FormSnapshot) + Send + Sync>;

#[derive(Default)]
pub(super) struct Subscribers {
    next: u64,
    entries: BTreeMap<SubscriptionId, Subscriber>,
}

impl FormController {
    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        Ok(project(&*read_lock(&self.state, "creating form snapshot")?))
    }

    /// Calls `subscriber` with a fresh snapshot after every mutating operation.
    pub fn subscribe(
        &self,
        subscriber: impl Fn(&FormSnapshot) + Send + Sync + 'static,
    ) -> FormResult<SubscriptionId> {
        let mut subscribers = write_lock(&self.subscribers, "adding subscriber")?;
        subscribers.next += 1;
        let id = SubscriptionId(subscribers.next);
        subscribers.entries.insert(id, Arc::new(subscriber));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> FormResult<bool> {
        Ok(write_lock(&self.subscribers, "removing subscriber")?
            .entries
            .remove(&id)
            .is_some())
    }

    /// Calls `watcher` whenever the value at `path` changes.
    pub fn watch(
        &self,
        path: impl IntoPath,
        watcher: impl Fn(Option<&Value>) + Send + Sync + 'static,
    ) -> FormResult<Option<SubscriptionId>> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(None);
        };
        let last = Mutex::new(self.get_value(&path)?);
        let id = self.subscribe(move |snapshot| {
            let current = path::get(&snapshot.values, &path);
            let mut last = match last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if last.as_ref() != current {
                *last = current.cloned();
                watcher(current);
            }
        })?;
        Ok(Some(id))
    }

    pub(super) fn notify(&self) -> FormResult<()> {
        let subscribers = read_lock(&self.subscribers, "reading subscribers")?
            .entries
            .values()
            .cloned()
            .collect::<Vec<_>>();
        if subscribers.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot()?;
        for subscriber in subscribers {
            subscriber(&snapshot);
        }
        Ok(())
    }
}
