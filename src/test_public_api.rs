use crate::prelude::*;
use serde_json::json;

fn assert_clone_send_sync<T: Clone + Send + Sync>() {}

#[test]
fn prelude_exports_the_form_surface() {
    assert_clone_send_sync::<FormController>();
    assert_clone_send_sync::<FieldArray>();
    assert_clone_send_sync::<FieldValidator>();

    let controller = FormController::new(json!({"users": [{"name": "Ada"}]}), FormOptions::default());
    let name = crate::path!("users", 0usize, "name");
    assert_eq!(name, Path::parse("users.0.name").expect("path"));
    assert_eq!(
        controller.get_value(&name).expect("value"),
        Some(json!("Ada"))
    );
    assert_eq!(path::get(&json!({"a": [1, 2]}), &crate::path!("a", 1usize)), Some(&json!(2)));
}
