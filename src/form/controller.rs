use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::errors::{ErrorMap, FieldError};
use super::field_array::FieldArrayState;
use super::registry::FieldRegistry;
use super::snapshot::{FieldState, Subscribers, project_field};
use super::store::ValueStore;
use super::validation::{FormModel, Resolver};
use crate::diagnostics::{Diagnostics, Misuse};
use crate::id::KeyRegistry;
use crate::path::{self, IntoPath, Path};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

/// Tags one validation run. A run may only apply its result while both numbers
/// are still current for its path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket {
    pub sequence: u64,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    OnSubmit,
    OnBlur,
    OnChange,
    /// Validate on the first blur, then on every change.
    OnTouched,
    All,
}

/// Timing used once the form has been submitted at least once.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevalidateMode {
    #[default]
    OnChange,
    OnBlur,
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaMode {
    #[default]
    FirstError,
    All,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub validate_mode: ValidationMode,
    pub revalidate_mode: RevalidateMode,
    pub criteria_mode: CriteriaMode,
    pub focus_first_error_on_submit: bool,
    /// Drop a field's value when its element detaches.
    pub should_unregister: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_mode: ValidationMode::OnSubmit,
            revalidate_mode: RevalidateMode::OnChange,
            criteria_mode: CriteriaMode::FirstError,
            focus_first_error_on_submit: true,
            should_unregister: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SetValueOptions {
    pub should_validate: bool,
    pub should_dirty: bool,
    pub should_touch: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KeepStateOptions {
    pub keep_values: bool,
    pub keep_dirty_values: bool,
    pub keep_default_values: bool,
    pub keep_errors: bool,
    pub keep_dirty: bool,
    pub keep_touched: bool,
    pub keep_is_submitted: bool,
    pub keep_is_submitting: bool,
    pub keep_is_submit_successful: bool,
    pub keep_submit_count: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResetFieldOptions {
    pub keep_error: bool,
    pub keep_dirty: bool,
    pub keep_touched: bool,
    /// Replaces the stored default for this path before resetting to it.
    pub default_value: Option<Value>,
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("form submit is already in progress")]
    AlreadySubmitting,
    #[error("submit handler failed: {0}")]
    SubmitHandler(#[source] BoxError),
    #[error("submit handler panicked: {0}")]
    SubmitHandlerPanicked(String),
    #[error(transparent)]
    InvalidPath(#[from] crate::path::PathError),
    #[error("form values do not match the model: {0}")]
    Model(#[from] serde_json::Error),
}

pub type FormResult<T> = Result<T, FormError>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(super) struct SubmitFlags {
    pub(super) is_submitting: bool,
    pub(super) is_submitted: bool,
    pub(super) is_submit_successful: bool,
    pub(super) submit_count: u32,
}

pub(super) struct FormState {
    pub(super) id: FormId,
    pub(super) store: ValueStore,
    pub(super) registry: FieldRegistry,
    pub(super) keys: KeyRegistry,
    pub(super) field_arrays: BTreeMap<Path, FieldArrayState>,
    pub(super) errors: ErrorMap,
    pub(super) dirty: BTreeSet<Path>,
    pub(super) touched: BTreeSet<Path>,
    pub(super) validating: BTreeSet<Path>,
    pub(super) tickets: BTreeMap<Path, u64>,
    pub(super) generation: u64,
    pub(super) submit: SubmitFlags,
    pub(super) is_loading: bool,
    pub(super) default_values_error: Option<String>,
}

impl FormState {
    fn new(defaults: Value) -> Self {
        let id = FormId::next();
        Self {
            id,
            store: ValueStore::new(defaults),
            registry: FieldRegistry::default(),
            keys: KeyRegistry::new(format!("f{}", id.0)),
            field_arrays: BTreeMap::new(),
            errors: ErrorMap::new(),
            dirty: BTreeSet::new(),
            touched: BTreeSet::new(),
            validating: BTreeSet::new(),
            tickets: BTreeMap::new(),
            generation: 0,
            submit: SubmitFlags::default(),
            is_loading: false,
            default_values_error: None,
        }
    }

    pub(super) fn begin_validation(&mut self, path: &Path) -> ValidationTicket {
        let sequence = self.tickets.entry(path.clone()).or_insert(0);
        *sequence += 1;
        let ticket = ValidationTicket {
            sequence: *sequence,
            generation: self.generation,
        };
        self.validating.insert(path.clone());
        ticket
    }

    pub(super) fn is_current(&self, path: &Path, ticket: ValidationTicket) -> bool {
        self.generation == ticket.generation && self.tickets.get(path) == Some(&ticket.sequence)
    }

    /// Invalidates every in-flight validation at or under `prefix`.
    pub(super) fn supersede_under(&mut self, prefix: &Path) {
        for (path, sequence) in self.tickets.iter_mut() {
            if path.starts_with(prefix) {
                *sequence += 1;
            }
        }
        self.validating.retain(|path| !path.starts_with(prefix));
    }

    /// Re-derives the tracked dirty flag for `path` and every tracked entry it overlaps.
    pub(super) fn refresh_dirty(&mut self, path: &Path) {
        let overlapping = self
            .dirty
            .iter()
            .filter(|tracked| tracked.overlaps(path))
            .cloned()
            .collect::<Vec<_>>();
        for tracked in overlapping {
            if !self.store.is_path_dirty(&tracked) {
                self.dirty.remove(&tracked);
            }
        }
        if self.store.is_path_dirty(path) {
            self.dirty.insert(path.clone());
        } else {
            self.dirty.remove(path);
        }
    }

    /// Keeps key lists in step with sequences written from outside the array manager.
    pub(super) fn resync_field_arrays(&mut self, written: &Path) {
        let FormState {
            store,
            field_arrays,
            keys,
            ..
        } = self;
        for (array_path, array) in field_arrays.iter_mut() {
            if !array_path.overlaps(written) {
                continue;
            }
            let len = store
                .get(array_path)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if array_path.starts_with(written) {
                array.remint(keys, len);
            } else {
                array.resize(keys, len);
            }
        }
    }

    fn remint_field_arrays(&mut self) {
        self.resync_field_arrays(&Path::root());
    }
}

#[derive(Clone)]
pub struct FormController {
    pub(super) options: FormOptions,
    pub(super) state: Arc<RwLock<FormState>>,
    pub(super) resolver: Option<Arc<dyn Resolver>>,
    pub(super) subscribers: Arc<RwLock<Subscribers>>,
    pub(super) diagnostics: Arc<Diagnostics>,
}

impl FormController {
    pub fn new(defaults: Value, options: FormOptions) -> Self {
        Self {
            options,
            state: Arc::new(RwLock::new(FormState::new(defaults))),
            resolver: None,
            subscribers: Arc::new(RwLock::new(Subscribers::default())),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    pub fn from_model<T: FormModel>(model: &T, options: FormOptions) -> FormResult<Self> {
        Ok(Self::new(serde_json::to_value(model)?, options))
    }

    /// Routes all field validation through a whole-form resolver.
    pub fn with_resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    /// Developer-misuse warnings reported by this form so far.
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.messages()
    }

    pub(super) fn warn(&self, misuse: &Misuse) {
        self.diagnostics.warn_once(misuse);
    }

    pub(super) fn resolve_path(&self, path: impl IntoPath) -> Option<Path> {
        match path.into_path() {
            Ok(path) => Some(path),
            Err(error) => {
                self.warn(&Misuse::MalformedPath(error));
                None
            }
        }
    }

    pub fn get_value(&self, path: impl IntoPath) -> FormResult<Option<Value>> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(None);
        };
        Ok(read_lock(&self.state, "reading form value")?
            .store
            .get(&path)
            .cloned())
    }

    pub fn get_values(&self) -> FormResult<Value> {
        Ok(read_lock(&self.state, "reading form values")?
            .store
            .all()
            .clone())
    }

    pub fn get_values_at<I, P>(&self, paths: I) -> FormResult<Vec<Option<Value>>>
    where
        I: IntoIterator<Item = P>,
        P: IntoPath,
    {
        let paths = paths
            .into_iter()
            .map(|path| self.resolve_path(path))
            .collect::<Vec<_>>();
        let state = read_lock(&self.state, "reading form values")?;
        Ok(paths
            .iter()
            .map(|path| path.as_ref().and_then(|path| state.store.get(path).cloned()))
            .collect())
    }

    pub fn default_values(&self) -> FormResult<Value> {
        Ok(read_lock(&self.state, "reading default values")?
            .store
            .defaults()
            .clone())
    }

    pub fn values_as<T: FormModel>(&self) -> FormResult<T> {
        Ok(serde_json::from_value(self.get_values()?)?)
    }

    pub async fn set_value(
        &self,
        path: impl IntoPath,
        value: Value,
        options: SetValueOptions,
    ) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        self.write_value(&path, value, options.should_dirty, options.should_touch)?;
        self.sync_elements(Some(&path))?;
        self.notify()?;
        if options.should_validate {
            let _ = self.validate_field_with_deps(path, None).await?;
        }
        Ok(())
    }

    pub async fn set_values<I, P>(&self, entries: I, options: SetValueOptions) -> FormResult<()>
    where
        I: IntoIterator<Item = (P, Value)>,
        P: IntoPath,
    {
        let mut written = Vec::new();
        for (path, value) in entries {
            let Some(path) = self.resolve_path(path) else {
                continue;
            };
            self.write_value(&path, value, options.should_dirty, options.should_touch)?;
            written.push(path);
        }
        for path in &written {
            self.sync_elements(Some(path))?;
        }
        self.notify()?;
        if options.should_validate {
            for path in written {
                let _ = self.validate_field_with_deps(path, None).await?;
            }
        }
        Ok(())
    }

    pub(super) fn write_value(
        &self,
        path: &Path,
        value: Value,
        mark_dirty: bool,
        mark_touched: bool,
    ) -> FormResult<()> {
        let overwritten = {
            let mut state = write_lock(&self.state, "writing form value")?;
            let report = state.store.set(path, value);
            state.resync_field_arrays(path);
            if mark_dirty {
                state.refresh_dirty(path);
            }
            if mark_touched {
                state.touched.insert(path.clone());
            }
            report.overwritten
        };
        for at in overwritten {
            self.warn(&Misuse::WriteThroughPrimitive {
                target: path.clone(),
                at,
            });
        }
        Ok(())
    }

    /// Restores the form to `values` (or the stored defaults). Every in-flight
    /// validation started before the reset is discarded when it resolves.
    pub fn reset(&self, values: Option<Value>, keep: KeepStateOptions) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "resetting form")?;
            state.generation += 1;
            state.tickets.clear();
            state.validating.clear();

            if let Some(values) = &values {
                if !keep.keep_default_values {
                    state.store.capture_default(values.clone());
                }
            }
            if !keep.keep_values {
                match values {
                    None if !keep.keep_dirty_values => state.store.reset_to_default(),
                    values => {
                        let mut next = values.unwrap_or_else(|| state.store.defaults().clone());
                        if keep.keep_dirty_values {
                            for dirty in &state.dirty {
                                if let Some(current) = state.store.get(dirty) {
                                    path::set(&mut next, dirty, current.clone());
                                }
                            }
                        }
                        state.store.replace_all(next);
                    }
                }
            }

            if !keep.keep_errors {
                state.errors = ErrorMap::new();
            }
            if !keep.keep_dirty && !keep.keep_dirty_values {
                state.dirty.clear();
            }
            if !keep.keep_touched {
                state.touched.clear();
            }
            if !keep.keep_submit_count {
                state.submit.submit_count = 0;
            }
            if !keep.keep_is_submitted {
                state.submit.is_submitted = false;
            }
            if !keep.keep_is_submitting {
                state.submit.is_submitting = false;
            }
            if !keep.keep_is_submit_successful {
                state.submit.is_submit_successful = false;
            }
            state.remint_field_arrays();
            tracing::debug!(target: "calmform", form = state.id.0, generation = state.generation, "form reset");
        }
        self.sync_elements(None)?;
        self.notify()
    }

    pub fn reset_field(&self, path: impl IntoPath, options: ResetFieldOptions) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        {
            let mut state = write_lock(&self.state, "resetting field")?;
            if let Some(default) = options.default_value {
                state.store.set_default(&path, default);
            }
            match state.store.default_at(&path).cloned() {
                Some(default) => {
                    state.store.set(&path, default);
                }
                None => {
                    state.store.unset(&path);
                }
            }
            state.resync_field_arrays(&path);
            state.supersede_under(&path);
            if !options.keep_error {
                state.errors.clear_under(&path);
            }
            if !options.keep_dirty {
                state.dirty.retain(|tracked| !tracked.starts_with(&path));
                state.refresh_dirty(&path);
            }
            if !options.keep_touched {
                state.touched.retain(|tracked| !tracked.starts_with(&path));
            }
        }
        self.sync_elements(Some(&path))?;
        self.notify()
    }

    /// Captures defaults produced asynchronously. A failed load never surfaces as
    /// `Err`: it is logged, stored in the snapshot and handed to `on_error`.
    pub async fn load_default_values<F, E>(
        &self,
        source: F,
        keep: KeepStateOptions,
        on_error: Option<Box<dyn FnOnce(&str) + Send>>,
    ) -> FormResult<bool>
    where
        F: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        {
            let mut state = write_lock(&self.state, "starting default value load")?;
            state.is_loading = true;
        }
        self.notify()?;

        match source.await {
            Ok(values) => {
                {
                    let mut state = write_lock(&self.state, "finishing default value load")?;
                    state.is_loading = false;
                    state.default_values_error = None;
                }
                self.reset(Some(values), keep)?;
                Ok(true)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(target: "calmform", %message, "failed to load default values");
                {
                    let mut state = write_lock(&self.state, "recording default value failure")?;
                    state.is_loading = false;
                    state.default_values_error = Some(message.clone());
                }
                self.notify()?;
                if let Some(on_error) = on_error {
                    on_error(&message);
                }
                Ok(false)
            }
        }
    }

    pub fn errors(&self) -> FormResult<ErrorMap> {
        Ok(read_lock(&self.state, "reading errors")?.errors.clone())
    }

    pub fn get_error(&self, path: impl IntoPath) -> FormResult<Option<FieldError>> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(None);
        };
        Ok(read_lock(&self.state, "reading field error")?
            .errors
            .get(&path)
            .cloned())
    }

    pub fn set_error(
        &self,
        path: impl IntoPath,
        error: FieldError,
        should_focus: bool,
    ) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        {
            let mut state = write_lock(&self.state, "setting field error")?;
            state.errors.set(path.clone(), error);
        }
        self.notify()?;
        if should_focus {
            let _ = self.set_focus(&path, false)?;
        }
        Ok(())
    }

    /// Merges `errors` into the error map, overwriting entries at the same paths.
    pub fn set_errors<I, P>(&self, errors: I) -> FormResult<()>
    where
        I: IntoIterator<Item = (P, FieldError)>,
        P: IntoPath,
    {
        let errors = errors
            .into_iter()
            .filter_map(|(path, error)| self.resolve_path(path).map(|path| (path, error)))
            .collect::<ErrorMap>();
        {
            let mut state = write_lock(&self.state, "merging field errors")?;
            state.errors.merge(errors);
        }
        self.notify()
    }

    pub fn replace_errors(&self, errors: ErrorMap) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "replacing field errors")?;
            state.errors = errors;
        }
        self.notify()
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "clearing all field errors")?;
            state.errors = ErrorMap::new();
        }
        self.notify()
    }

    pub fn clear_field_errors<I, P>(&self, paths: I) -> FormResult<()>
    where
        I: IntoIterator<Item = P>,
        P: IntoPath,
    {
        let paths = paths
            .into_iter()
            .filter_map(|path| self.resolve_path(path))
            .collect::<Vec<_>>();
        {
            let mut state = write_lock(&self.state, "clearing field errors")?;
            for path in &paths {
                state.errors.clear_under(path);
            }
        }
        self.notify()
    }

    pub fn get_field_state(&self, path: impl IntoPath) -> FormResult<FieldState> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(FieldState::default());
        };
        let state = read_lock(&self.state, "reading field state")?;
        Ok(project_field(&state, &path))
    }
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
