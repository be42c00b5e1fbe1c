mod binding;
mod controller;
mod errors;
mod field_array;
mod registry;
mod snapshot;
mod store;
mod submit;
mod validation;

#[cfg(test)]
mod tests;

pub use calmform_derive::FormModel;
pub use binding::FieldElement;
pub use controller::{
    BoxError, CriteriaMode, FormController, FormError, FormId, FormOptions, FormResult,
    KeepStateOptions, ResetFieldOptions, RevalidateMode, SetValueOptions, ValidationMode,
    ValidationTicket,
};
pub use errors::{ErrorMap, FieldError, INTERNAL_ERROR_KIND, ROOT_ERROR_KEY};
pub use field_array::{ArrayRules, FieldArray, FieldArrayItem, FieldArrayOptions};
pub use registry::{FieldMode, FieldOptions, UnregisterOptions};
pub use snapshot::{FieldState, FormSnapshot, SubscriptionId};
pub use submit::{SubmitHandler, SubmitOutcome};
pub use validation::{
    BoxedResolverFuture, BoxedValidationFuture, FieldContext, FieldRules, FieldValidator,
    FormModel, PatternRule, Resolver, ResolverFailure, Rule, ValidationOutcome,
};
