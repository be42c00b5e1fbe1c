pub use crate::form::{
    ErrorMap, FieldArray, FieldArrayOptions, FieldElement, FieldError, FieldOptions, FieldRules,
    FieldValidator, FormController, FormError, FormModel, FormOptions, FormResult, FormSnapshot,
    KeepStateOptions, SetValueOptions, SubmitOutcome, ValidationMode, ValidationOutcome,
};
pub use crate::path;
pub use crate::path::{IntoPath, Path};
