use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::controller::{BoxError, FormController, FormError, FormResult, read_lock, write_lock};
use super::errors::ErrorMap;
use super::validation::panic_message;
use crate::path;

type BoxedSubmitFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
type OnValid = Arc<dyn Fn(Value) -> BoxedSubmitFuture + Send + Sync>;
type OnInvalid = Arc<dyn Fn(&ErrorMap) + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Validation passed and `on_valid` completed.
    Submitted,
    Invalid,
}

/// Submits the form it was created from. Cheap to clone; clones share the
/// form's in-flight guard.
#[derive(Clone)]
pub struct SubmitHandler {
    controller: FormController,
    on_valid: OnValid,
    on_invalid: Option<OnInvalid>,
}

impl FormController {
    pub fn handle_submit<F, Fut, E>(&self, on_valid: F) -> SubmitHandler
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let on_valid = Arc::new(on_valid);
        SubmitHandler {
            controller: self.clone(),
            on_valid: Arc::new(move |values: Value| -> BoxedSubmitFuture {
                let future = on_valid(values);
                Box::pin(async move { future.await.map_err(Into::into) })
            }),
            on_invalid: None,
        }
    }
}

/// Clears `is_submitting` however the submit ends, including when its future
/// is dropped mid-flight.
struct SubmitGuard<'a> {
    controller: &'a FormController,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        match self.controller.state.write() {
            Ok(mut state) => state.submit.is_submitting = false,
            Err(poisoned) => poisoned.into_inner().submit.is_submitting = false,
        }
        if let Err(error) = self.controller.notify() {
            tracing::error!(target: "calmform", %error, "failed to notify after submit");
        }
    }
}

impl SubmitHandler {
    pub fn on_invalid(mut self, on_invalid: impl Fn(&ErrorMap) + Send + Sync + 'static) -> Self {
        self.on_invalid = Some(Arc::new(on_invalid));
        self
    }

    /// Validates the whole form and hands the values to `on_valid`.
    ///
    /// A call made while another submit of the same form is in flight returns
    /// `FormError::AlreadySubmitting` without running any callback.
    pub async fn submit(&self) -> FormResult<SubmitOutcome> {
        let controller = &self.controller;
        {
            let mut state = write_lock(&controller.state, "preparing submit")?;
            if state.submit.is_submitting {
                return Err(FormError::AlreadySubmitting);
            }
            state.submit.is_submitting = true;
            state.submit.is_submitted = true;
            state.submit.is_submit_successful = false;
            state.submit.submit_count = state.submit.submit_count.saturating_add(1);
            state.errors.retain(|path, _| !ErrorMap::is_root_error(path));
            tracing::debug!(target: "calmform", form = state.id.0, count = state.submit.submit_count, "submit started");
        }
        let guard = SubmitGuard { controller };
        controller.notify()?;

        let result = self.run(controller).await;
        drop(guard);
        result
    }

    async fn run(&self, controller: &FormController) -> FormResult<SubmitOutcome> {
        let valid = controller.validate_all().await?;
        let errors = controller.errors()?;
        if !valid || !errors.is_empty() {
            tracing::debug!(target: "calmform", errors = errors.len(), "submit blocked by validation");
            if let Some(on_invalid) = &self.on_invalid {
                on_invalid(&errors);
            }
            if controller.options.focus_first_error_on_submit {
                controller.focus_first_error()?;
            }
            return Ok(SubmitOutcome::Invalid);
        }

        let values = submission_values(controller)?;
        let on_valid = self.on_valid.clone();
        match AssertUnwindSafe(async move { on_valid(values).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                write_lock(&controller.state, "completing submit")?
                    .submit
                    .is_submit_successful = true;
                Ok(SubmitOutcome::Submitted)
            }
            Ok(Err(error)) => {
                tracing::debug!(target: "calmform", %error, "submit handler failed");
                Err(FormError::SubmitHandler(error))
            }
            Err(panic) => Err(FormError::SubmitHandlerPanicked(panic_message(panic.as_ref()))),
        }
    }
}

/// The value tree with disabled fields left out.
fn submission_values(controller: &FormController) -> FormResult<Value> {
    let state = read_lock(&controller.state, "collecting submit values")?;
    let mut values = state.store.all().clone();
    for (field, entry) in state.registry.iter() {
        if entry.options.disabled {
            path::unset(&mut values, field);
        }
    }
    Ok(values)
}
