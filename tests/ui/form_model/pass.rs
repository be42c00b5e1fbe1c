use calmform::form::FormModel;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, calmform::form::FormModel)]
#[serde(rename_all = "camelCase")]
struct SignupForm {
    email: String,
    display_name: String,
    #[serde(rename = "pw")]
    password: String,
    #[serde(skip)]
    #[allow(dead_code)]
    session: Option<u64>,
}

fn main() {
    let fields = SignupForm::fields();
    assert_eq!(fields.email().to_string(), "email");
    assert_eq!(fields.display_name().to_string(), "displayName");
    assert_eq!(fields.password().to_string(), "pw");
}
