use std::sync::Arc;

use serde_json::Value;

use super::controller::{FormController, FormResult, read_lock, write_lock};
use super::registry::{FieldMode, FieldOptions};
use crate::path::{self, IntoPath, Path};

/// The UI-side handle for a registered field.
pub trait FieldElement: Send + Sync {
    fn focus(&self, select: bool);

    /// Receives values written by the engine into uncontrolled fields.
    fn write_value(&self, _value: Option<&Value>) {}
}

impl FormController {
    /// Binds `element` to `path`, registering the field if needed. The most
    /// recently attached element wins.
    pub fn attach_element(
        &self,
        path: impl IntoPath,
        element: Arc<dyn FieldElement>,
    ) -> FormResult<()> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(());
        };
        if !read_lock(&self.state, "reading field registry")?
            .registry
            .contains(&path)
        {
            self.register(&path, FieldOptions::default())?;
        }
        let (value, uncontrolled) = {
            let mut state = write_lock(&self.state, "attaching field element")?;
            let value = state.store.get(&path).cloned();
            let Some(entry) = state.registry.get_mut(&path) else {
                return Ok(());
            };
            entry.element = Some(element.clone());
            (value, entry.options.mode == FieldMode::Uncontrolled)
        };
        if uncontrolled {
            element.write_value(value.as_ref());
        }
        Ok(())
    }

    /// Focuses the element bound to `path`. Returns whether one was found.
    pub fn set_focus(&self, path: impl IntoPath, select: bool) -> FormResult<bool> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(false);
        };
        let element = read_lock(&self.state, "reading field element")?
            .registry
            .get(&path)
            .and_then(|entry| entry.element.clone());
        match element {
            Some(element) => {
                element.focus(select);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Focuses the first erroring field, in error-map order, that has an element.
    pub(super) fn focus_first_error(&self) -> FormResult<Option<Path>> {
        let target = {
            let state = read_lock(&self.state, "finding first error")?;
            state.errors.paths().find_map(|path| {
                state
                    .registry
                    .get(path)
                    .and_then(|entry| entry.element.clone())
                    .map(|element| (path.clone(), element))
            })
        };
        Ok(target.map(|(path, element)| {
            element.focus(false);
            tracing::trace!(target: "calmform", %path, "focused first error");
            path
        }))
    }

    /// Pushes current values into uncontrolled elements overlapping `scope`
    /// (every element when `scope` is `None`). Runs without holding the state lock.
    pub(super) fn sync_elements(&self, scope: Option<&Path>) -> FormResult<()> {
        let pending = {
            let state = read_lock(&self.state, "collecting uncontrolled elements")?;
            state
                .registry
                .iter()
                .filter(|(path, entry)| {
                    entry.options.mode == FieldMode::Uncontrolled
                        && scope.is_none_or(|scope| scope.overlaps(path))
                })
                .filter_map(|(path, entry)| {
                    let element = entry.element.clone()?;
                    Some((element, path::get(state.store.all(), path).cloned()))
                })
                .collect::<Vec<_>>()
        };
        for (element, value) in pending {
            element.write_value(value.as_ref());
        }
        Ok(())
    }
}
