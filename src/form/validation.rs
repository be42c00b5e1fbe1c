use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use futures_timer::Delay;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::controller::{
    CriteriaMode, FormController, FormResult, RevalidateMode, ValidationMode, ValidationTicket,
    read_lock, write_lock,
};
use super::errors::{ErrorMap, FieldError};
use crate::path::{self, IntoPath, Path, is_empty_value};

/// A serde model whose fields can be addressed by generated paths.
pub trait FormModel: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
}

pub type BoxedValidationFuture = Pin<Box<dyn Future<Output = Result<(), FieldError>> + Send>>;
pub type BoxedResolverFuture =
    Pin<Box<dyn Future<Output = Result<ErrorMap, ResolverFailure>> + Send>>;

/// Inputs handed to a field validator, captured when the run starts.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldContext {
    pub path: Path,
    pub value: Option<Value>,
    pub values: Value,
}

type FieldValidatorFn = Arc<dyn Fn(FieldContext) -> BoxedValidationFuture + Send + Sync>;

#[derive(Clone)]
pub struct FieldValidator(FieldValidatorFn);

impl FieldValidator {
    pub fn sync<F>(validator: F) -> Self
    where
        F: Fn(&FieldContext) -> Result<(), FieldError> + Send + Sync + 'static,
    {
        let validator = Arc::new(validator);
        Self(Arc::new(move |cx: FieldContext| -> BoxedValidationFuture {
            let validator = validator.clone();
            Box::pin(async move { validator(&cx) })
        }))
    }

    pub fn future<F, Fut>(validator: F) -> Self
    where
        F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FieldError>> + Send + 'static,
    {
        Self(Arc::new(move |cx: FieldContext| -> BoxedValidationFuture {
            Box::pin(validator(cx))
        }))
    }

    fn call(&self, cx: FieldContext) -> BoxedValidationFuture {
        (self.0)(cx)
    }
}

impl Debug for FieldValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldValidator(..)")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ResolverFailure(pub String);

/// Whole-form validation: given every value, report every error.
pub trait Resolver: Send + Sync {
    fn resolve(&self, values: Value) -> BoxedResolverFuture;
}

impl<F, Fut> Resolver for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ErrorMap, ResolverFailure>> + Send + 'static,
{
    fn resolve(&self, values: Value) -> BoxedResolverFuture {
        Box::pin((self)(values))
    }
}

#[derive(Clone, Debug)]
pub struct Rule<T> {
    pub value: T,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct PatternRule {
    pub pattern: Regex,
    pub message: String,
}

/// Built-in constraints checked before a field's custom validator. Only
/// `required` applies to an empty value, except that length rules still see
/// empty sequences.
#[derive(Clone, Debug, Default)]
pub struct FieldRules {
    pub required: Option<String>,
    pub min_length: Option<Rule<usize>>,
    pub max_length: Option<Rule<usize>>,
    pub min: Option<Rule<f64>>,
    pub max: Option<Rule<f64>>,
    pub pattern: Option<PatternRule>,
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, message: impl Into<String>) -> Self {
        self.required = Some(message.into());
        self
    }

    pub fn min_length(mut self, value: usize, message: impl Into<String>) -> Self {
        self.min_length = Some(Rule {
            value,
            message: message.into(),
        });
        self
    }

    pub fn max_length(mut self, value: usize, message: impl Into<String>) -> Self {
        self.max_length = Some(Rule {
            value,
            message: message.into(),
        });
        self
    }

    pub fn min(mut self, value: f64, message: impl Into<String>) -> Self {
        self.min = Some(Rule {
            value,
            message: message.into(),
        });
        self
    }

    pub fn max(mut self, value: f64, message: impl Into<String>) -> Self {
        self.max = Some(Rule {
            value,
            message: message.into(),
        });
        self
    }

    pub fn pattern(mut self, pattern: Regex, message: impl Into<String>) -> Self {
        self.pattern = Some(PatternRule {
            pattern,
            message: message.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.pattern.is_none()
    }

    pub fn evaluate(&self, value: Option<&Value>, criteria: CriteriaMode) -> Result<(), FieldError> {
        let mut failures = Vec::<(&'static str, &str)>::new();
        let empty = is_empty_value(value);
        if empty {
            if let Some(message) = &self.required {
                failures.push(("required", message.as_str()));
            }
        }
        // An empty sequence still has a length to check.
        let constrained = value.filter(|value| !empty || value.is_array());
        if let Some(value) = constrained {
            let length = match value {
                Value::String(text) => Some(text.chars().count()),
                Value::Array(items) => Some(items.len()),
                _ => None,
            };
            let number = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let (Some(rule), Some(length)) = (&self.min_length, length) {
                if length < rule.value {
                    failures.push(("min_length", rule.message.as_str()));
                }
            }
            if let (Some(rule), Some(length)) = (&self.max_length, length) {
                if length > rule.value {
                    failures.push(("max_length", rule.message.as_str()));
                }
            }
            if let (Some(rule), Some(number)) = (&self.min, number) {
                if number < rule.value {
                    failures.push(("min", rule.message.as_str()));
                }
            }
            if let (Some(rule), Some(number)) = (&self.max, number) {
                if number > rule.value {
                    failures.push(("max", rule.message.as_str()));
                }
            }
            if let (Some(rule), Value::String(text)) = (&self.pattern, value) {
                if !rule.pattern.is_match(text) {
                    failures.push(("pattern", rule.message.as_str()));
                }
            }
        }

        let mut failures = failures.into_iter();
        let Some((kind, message)) = failures.next() else {
            return Ok(());
        };
        let mut error = FieldError::new(kind, message);
        if criteria == CriteriaMode::All {
            error = error.with_type(kind, message);
            for (kind, message) in failures {
                error = error.with_type(kind, message);
            }
        }
        Err(error)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationOutcome {
    Valid,
    Invalid,
    /// A newer run or a reset overtook this one; its result was dropped.
    Superseded,
    /// Mode gating or a disabled field meant nothing ran.
    Skipped,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum FieldEvent {
    Change,
    Blur,
}

struct FieldJob {
    path: Path,
    values: Value,
    rules: FieldRules,
    validator: Option<FieldValidator>,
    criteria: CriteriaMode,
}

enum Verdict {
    /// Result for exactly the validated path.
    Field(Option<FieldError>),
    /// Authoritative errors for the validated path and everything beneath it.
    Subtree(ErrorMap),
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}

impl FormController {
    /// A value changed in the UI.
    pub async fn change(&self, path: impl IntoPath, value: Value) -> FormResult<ValidationOutcome> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(ValidationOutcome::Skipped);
        };
        self.write_value(&path, value, true, false)?;
        self.notify()?;
        if self.should_validate(FieldEvent::Change, &path)? {
            return self.validate_field_with_deps(path, Some(FieldEvent::Change)).await;
        }
        Ok(ValidationOutcome::Skipped)
    }

    /// A field lost focus in the UI.
    pub async fn blur(&self, path: impl IntoPath) -> FormResult<ValidationOutcome> {
        let Some(path) = self.resolve_path(path) else {
            return Ok(ValidationOutcome::Skipped);
        };
        {
            let mut state = write_lock(&self.state, "touching field")?;
            state.touched.insert(path.clone());
        }
        self.notify()?;
        if self.should_validate(FieldEvent::Blur, &path)? {
            return self.validate_field_with_deps(path, Some(FieldEvent::Blur)).await;
        }
        Ok(ValidationOutcome::Skipped)
    }

    /// Validates the given paths now, ignoring mode and debounce. An empty list
    /// validates the whole form. Returns whether every validated path passed.
    pub async fn trigger<I, P>(&self, paths: I) -> FormResult<bool>
    where
        I: IntoIterator<Item = P>,
        P: IntoPath,
    {
        let paths = paths
            .into_iter()
            .filter_map(|path| self.resolve_path(path))
            .collect::<Vec<_>>();
        if paths.is_empty() {
            return self.trigger_all().await;
        }
        let outcomes = join_all(paths.into_iter().map(|path| self.validate_path(path, false)))
            .await
            .into_iter()
            .collect::<FormResult<Vec<_>>>()?;
        Ok(!outcomes.contains(&ValidationOutcome::Invalid))
    }

    pub async fn trigger_all(&self) -> FormResult<bool> {
        self.validate_all().await
    }

    pub(super) fn should_validate(&self, event: FieldEvent, path: &Path) -> FormResult<bool> {
        let state = read_lock(&self.state, "reading validation gating state")?;
        if state.submit.is_submitted {
            return Ok(matches!(
                (self.options.revalidate_mode, event),
                (RevalidateMode::OnChange, FieldEvent::Change)
                    | (RevalidateMode::OnBlur, FieldEvent::Blur)
            ));
        }
        Ok(match (self.options.validate_mode, event) {
            (ValidationMode::All, _)
            | (ValidationMode::OnChange, FieldEvent::Change)
            | (ValidationMode::OnBlur, FieldEvent::Blur)
            | (ValidationMode::OnTouched, FieldEvent::Blur) => true,
            (ValidationMode::OnTouched, FieldEvent::Change) => state.touched.contains(path),
            _ => false,
        })
    }

    /// Validates `path`, then its dependents. A dependent re-runs only when the
    /// triggering event would validate it directly; `None` means an explicit
    /// request, which validates every dependent.
    pub(super) async fn validate_field_with_deps(
        &self,
        path: Path,
        event: Option<FieldEvent>,
    ) -> FormResult<ValidationOutcome> {
        let deps = read_lock(&self.state, "reading field dependencies")?
            .registry
            .get(&path)
            .map(|entry| entry.options.deps.clone())
            .unwrap_or_default();
        let deps = match event {
            Some(event) => deps
                .into_iter()
                .map(|dep| Ok((self.should_validate(event, &dep)?, dep)))
                .collect::<FormResult<Vec<_>>>()?
                .into_iter()
                .filter_map(|(gated_in, dep)| gated_in.then_some(dep))
                .collect(),
            None => deps,
        };
        let outcome = self.validate_path(path, true).await?;
        join_all(deps.into_iter().map(|dep| self.validate_path(dep, true)))
            .await
            .into_iter()
            .collect::<FormResult<Vec<_>>>()?;
        Ok(outcome)
    }

    /// Runs validation for one path under the supersession rule: the result is
    /// applied only if no newer run for the path started and no reset happened
    /// while it was pending.
    pub(super) async fn validate_path(
        &self,
        path: Path,
        debounced: bool,
    ) -> FormResult<ValidationOutcome> {
        let (ticket, debounce) = {
            let mut state = write_lock(&self.state, "starting field validation")?;
            if state.registry.is_disabled(&path) {
                return Ok(ValidationOutcome::Skipped);
            }
            let debounce = state
                .registry
                .get(&path)
                .map(|entry| entry.options.debounce)
                .unwrap_or_default();
            (state.begin_validation(&path), debounce)
        };
        self.notify()?;

        if debounced && !debounce.is_zero() {
            Delay::new(debounce).await;
            if !self.is_current(&path, ticket)? {
                tracing::trace!(target: "calmform", %path, "debounced validation superseded");
                return Ok(ValidationOutcome::Superseded);
            }
        }

        let verdict = match &self.resolver {
            Some(resolver) => {
                let values = read_lock(&self.state, "reading values for resolver")?
                    .store
                    .all()
                    .clone();
                match run_resolver(resolver.as_ref(), values).await {
                    Ok(Ok(errors)) => Verdict::Subtree(errors.scoped(&path)),
                    Ok(Err(failure)) => Verdict::Field(Some(FieldError::internal(failure.0))),
                    Err(panic) => {
                        Verdict::Field(Some(FieldError::internal(panic_message(panic.as_ref()))))
                    }
                }
            }
            None => {
                let job = {
                    let state = read_lock(&self.state, "reading field validators")?;
                    let entry = state.registry.get(&path);
                    FieldJob {
                        path: path.clone(),
                        values: state.store.all().clone(),
                        rules: entry.map(|entry| entry.options.rules.clone()).unwrap_or_default(),
                        validator: entry.and_then(|entry| entry.options.validate.clone()),
                        criteria: self.options.criteria_mode,
                    }
                };
                Verdict::Field(run_field_job(job).await)
            }
        };

        self.finish_validation(&path, ticket, verdict)
    }

    fn is_current(&self, path: &Path, ticket: ValidationTicket) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking latest validation ticket")?.is_current(path, ticket))
    }

    fn finish_validation(
        &self,
        path: &Path,
        ticket: ValidationTicket,
        verdict: Verdict,
    ) -> FormResult<ValidationOutcome> {
        let outcome = {
            let mut state = write_lock(&self.state, "finishing field validation")?;
            if !state.is_current(path, ticket) {
                tracing::trace!(target: "calmform", %path, ?ticket, "discarding superseded validation");
                return Ok(ValidationOutcome::Superseded);
            }
            state.validating.remove(path);
            let valid = match verdict {
                Verdict::Field(Some(error)) => {
                    tracing::debug!(target: "calmform", %path, kind = %error.kind, "field invalid");
                    state.errors.set(path.clone(), error);
                    false
                }
                Verdict::Field(None) => {
                    state.errors.remove(path);
                    true
                }
                Verdict::Subtree(errors) => {
                    state.errors.clear_under(path);
                    let valid = errors.is_empty();
                    state.errors.merge(errors);
                    valid
                }
            };
            if valid {
                ValidationOutcome::Valid
            } else {
                ValidationOutcome::Invalid
            }
        };
        self.notify()?;
        Ok(outcome)
    }

    /// Validates every enabled field (or runs the resolver over the whole tree).
    pub(super) async fn validate_all(&self) -> FormResult<bool> {
        let Some(resolver) = self.resolver.clone() else {
            let paths = {
                let state = read_lock(&self.state, "collecting registered fields")?;
                state
                    .registry
                    .paths_in_order()
                    .into_iter()
                    .filter(|path| !state.registry.is_disabled(path))
                    .collect::<Vec<_>>()
            };
            let outcomes = join_all(paths.into_iter().map(|path| self.validate_path(path, false)))
                .await
                .into_iter()
                .collect::<FormResult<Vec<_>>>()?;
            return Ok(!outcomes.contains(&ValidationOutcome::Invalid));
        };

        let root = Path::root();
        let (ticket, values) = {
            let mut state = write_lock(&self.state, "starting form validation")?;
            (state.begin_validation(&root), state.store.all().clone())
        };
        self.notify()?;

        let errors = match run_resolver(resolver.as_ref(), values).await {
            Ok(Ok(errors)) => errors,
            Ok(Err(failure)) => {
                ErrorMap::from_iter([(ErrorMap::root_path(), FieldError::internal(failure.0))])
            }
            Err(panic) => ErrorMap::from_iter([(
                ErrorMap::root_path(),
                FieldError::internal(panic_message(panic.as_ref())),
            )]),
        };

        let valid = {
            let mut state = write_lock(&self.state, "applying form validation result")?;
            if !state.is_current(&root, ticket) {
                return Ok(state.errors.is_empty());
            }
            state.validating.remove(&root);
            let mut errors = errors;
            errors.retain(|path, _| !state.registry.is_disabled(path));
            let valid = errors.is_empty();
            // Manual `root.*` errors survive; the resolver-failure slot belongs to this run.
            let owned = ErrorMap::root_path();
            state.errors.retain(|path, error| {
                ErrorMap::is_root_error(path) && !(path == &owned && error.is_internal())
            });
            state.errors.merge(errors);
            valid
        };
        self.notify()?;
        Ok(valid)
    }
}

/// Runs the resolver, turning a panic (while building or polling its future)
/// into `Err` with the panic payload.
async fn run_resolver(
    resolver: &dyn Resolver,
    values: Value,
) -> Result<Result<ErrorMap, ResolverFailure>, Box<dyn Any + Send>> {
    AssertUnwindSafe(async move { resolver.resolve(values).await })
        .catch_unwind()
        .await
}

async fn run_field_job(job: FieldJob) -> Option<FieldError> {
    let value = path::get(&job.values, &job.path).cloned();
    let rules_error = job.rules.evaluate(value.as_ref(), job.criteria).err();
    if rules_error.is_some() && job.criteria == CriteriaMode::FirstError {
        return rules_error;
    }
    let Some(validator) = job.validator else {
        return rules_error;
    };

    let cx = FieldContext {
        path: job.path,
        value,
        values: job.values,
    };
    let validator_error = match AssertUnwindSafe(async move { validator.call(cx).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(panic) => Some(FieldError::internal(panic_message(panic.as_ref()))),
    };
    match (rules_error, validator_error) {
        (Some(error), Some(extra)) => Some(error.with_type(extra.kind, extra.message)),
        (error, None) | (None, error) => error,
    }
}
