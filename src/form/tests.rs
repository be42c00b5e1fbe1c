use super::*;
use futures::channel::oneshot;
use futures::executor::block_on;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::id::ItemKey;
use crate::path::Path;

fn p(raw: &str) -> Path {
    Path::parse(raw).expect("test path must parse")
}

fn form(defaults: Value, validate_mode: ValidationMode) -> FormController {
    FormController::new(
        defaults,
        FormOptions {
            validate_mode,
            ..FormOptions::default()
        },
    )
}

fn required(message: &str) -> FieldOptions {
    FieldOptions::new().rules(FieldRules::new().required(message))
}

#[derive(Default)]
struct RecordingElement {
    written: Mutex<Vec<Option<Value>>>,
    focused: AtomicUsize,
}

impl RecordingElement {
    fn last_written(&self) -> Option<Option<Value>> {
        self.written.lock().expect("written lock").last().cloned()
    }
}

impl FieldElement for RecordingElement {
    fn focus(&self, _select: bool) {
        self.focused.fetch_add(1, Ordering::SeqCst);
    }

    fn write_value(&self, value: Option<&Value>) {
        self.written
            .lock()
            .expect("written lock")
            .push(value.cloned());
    }
}

#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FormModel)]
struct ProfileForm {
    email: String,
    #[serde(rename = "displayName")]
    display_name: String,
    age: u32,
}

#[test]
fn blur_validates_only_the_blurred_field_in_on_blur_mode() {
    let controller = form(json!({"email": "", "password": ""}), ValidationMode::OnBlur);
    controller
        .register("email", required("email is required"))
        .expect("register email");
    controller
        .register(
            "password",
            FieldOptions::new().rules(
                FieldRules::new()
                    .required("password is required")
                    .min_length(8, "password is too short"),
            ),
        )
        .expect("register password");

    let outcome = block_on(controller.blur("email")).expect("blur email");
    assert_eq!(outcome, ValidationOutcome::Invalid);
    let errors = controller.errors().expect("errors");
    assert_eq!(
        errors.get(&p("email")).map(|error| error.message.as_str()),
        Some("email is required")
    );
    assert!(errors.get(&p("password")).is_none());

    block_on(controller.change("password", json!("short"))).expect("change password");
    assert!(controller.get_error("password").expect("error").is_none());
    block_on(controller.blur("password")).expect("blur password");
    assert_eq!(
        controller
            .get_error("password")
            .expect("error")
            .map(|error| error.kind),
        Some("min_length".to_owned())
    );
}

#[test]
fn change_respects_on_submit_then_revalidates_after_submit() {
    let controller = form(json!({"email": ""}), ValidationMode::OnSubmit);
    controller
        .register("email", required("required"))
        .expect("register");

    let outcome = block_on(controller.change("email", json!(""))).expect("change");
    assert_eq!(outcome, ValidationOutcome::Skipped);
    assert!(controller.snapshot().expect("snapshot").is_valid);

    let handler = controller.handle_submit(|_| async { Ok::<(), std::io::Error>(()) });
    assert_eq!(
        block_on(handler.submit()).expect("submit"),
        SubmitOutcome::Invalid
    );

    let outcome = block_on(controller.change("email", json!("a@b.c"))).expect("change");
    assert_eq!(outcome, ValidationOutcome::Valid);
    assert!(controller.snapshot().expect("snapshot").is_valid);
}

#[test]
fn on_touched_waits_for_the_first_blur() {
    let controller = form(json!({"name": ""}), ValidationMode::OnTouched);
    controller
        .register("name", required("required"))
        .expect("register");

    assert_eq!(
        block_on(controller.change("name", json!(""))).expect("change"),
        ValidationOutcome::Skipped
    );
    assert_eq!(
        block_on(controller.blur("name")).expect("blur"),
        ValidationOutcome::Invalid
    );
    assert_eq!(
        block_on(controller.change("name", json!("Ada"))).expect("change"),
        ValidationOutcome::Valid
    );
    assert!(controller.get_error("name").expect("error").is_none());
}

#[test]
fn dependencies_revalidate_linked_fields() {
    let controller = form(
        json!({"password": "", "confirm": ""}),
        ValidationMode::OnChange,
    );
    controller
        .register("password", FieldOptions::new().dep("confirm"))
        .expect("register password");
    controller
        .register(
            "confirm",
            FieldOptions::new().validate(FieldValidator::sync(|cx: &FieldContext| {
                if cx.value.as_ref() == cx.values.get("password") {
                    Ok(())
                } else {
                    Err(FieldError::custom("passwords differ"))
                }
            })),
        )
        .expect("register confirm");

    block_on(controller.change("confirm", json!("secret"))).expect("change confirm");
    assert!(controller.get_error("confirm").expect("error").is_some());

    block_on(controller.change("password", json!("secret"))).expect("change password");
    assert!(controller.get_error("confirm").expect("error").is_none());
}

#[test]
fn dependencies_follow_mode_gating() {
    let controller = form(json!({"a": "", "b": ""}), ValidationMode::OnTouched);
    controller
        .register("a", FieldOptions::new().dep("b"))
        .expect("register a");
    controller
        .register("b", required("b required"))
        .expect("register b");

    block_on(controller.blur("a")).expect("blur a");
    block_on(controller.change("a", json!("x"))).expect("change a");
    assert!(controller.get_error("b").expect("error").is_none());
    assert!(!controller.get_field_state("b").expect("state").is_touched);

    assert_eq!(
        block_on(controller.blur("b")).expect("blur b"),
        ValidationOutcome::Invalid
    );
    block_on(controller.set_value("b", json!("filled"), SetValueOptions::default()))
        .expect("set b");
    assert!(controller.get_error("b").expect("error").is_some());

    block_on(controller.change("a", json!("y"))).expect("change a again");
    assert!(controller.get_error("b").expect("error").is_none());
}

#[test]
fn validation_started_before_reset_is_discarded() {
    let controller = form(json!({"email": ""}), ValidationMode::OnSubmit);
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    controller
        .register(
            "email",
            FieldOptions::new().validate(FieldValidator::future(move |_cx| {
                let gate = gate.lock().expect("gate lock").take();
                async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    Err::<(), FieldError>(FieldError::custom("stale result"))
                }
            })),
        )
        .expect("register");

    let validating = controller.trigger(["email"]);
    let resetting = {
        let controller = controller.clone();
        async move {
            controller
                .reset(None, KeepStateOptions::default())
                .expect("reset");
            release.send(()).expect("release validator");
        }
    };
    let (valid, ()) = block_on(async { futures::join!(validating, resetting) });

    assert!(valid.expect("trigger"));
    let snapshot = controller.snapshot().expect("snapshot");
    assert!(snapshot.errors.is_empty());
    assert!(!snapshot.is_validating);
}

#[test]
fn debounced_validation_keeps_only_the_latest_event() {
    let controller = form(json!({"name": ""}), ValidationMode::OnChange);
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    controller
        .register(
            "name",
            FieldOptions::new()
                .debounce_ms(20)
                .validate(FieldValidator::sync(move |cx: &FieldContext| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    if cx.value == Some(json!("bad")) {
                        Err(FieldError::custom("bad name"))
                    } else {
                        Ok(())
                    }
                })),
        )
        .expect("register");

    let (first, second) = block_on(async {
        futures::join!(
            controller.change("name", json!("bad")),
            controller.change("name", json!("good"))
        )
    });

    assert_eq!(first.expect("first"), ValidationOutcome::Superseded);
    assert_eq!(second.expect("second"), ValidationOutcome::Valid);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(controller.get_error("name").expect("error").is_none());
}

#[test]
fn validator_panics_become_internal_errors() {
    let controller = form(json!({"name": "x"}), ValidationMode::OnSubmit);
    controller
        .register(
            "name",
            FieldOptions::new().validate(FieldValidator::sync(
                |_cx: &FieldContext| -> Result<(), FieldError> { panic!("validator exploded") },
            )),
        )
        .expect("register");

    assert!(!block_on(controller.trigger(["name"])).expect("trigger"));
    let error = controller
        .get_error("name")
        .expect("error")
        .expect("internal error recorded");
    assert!(error.is_internal());
    assert_eq!(error.message, "validator exploded");
}

#[test]
fn criteria_all_collects_rule_failures() {
    let controller = FormController::new(
        json!({"code": "ab"}),
        FormOptions {
            criteria_mode: CriteriaMode::All,
            ..FormOptions::default()
        },
    );
    controller
        .register(
            "code",
            FieldOptions::new().rules(
                FieldRules::new()
                    .min_length(4, "too short")
                    .pattern(regex::Regex::new("^[0-9]+$").expect("regex"), "digits only"),
            ),
        )
        .expect("register");

    assert!(!block_on(controller.trigger_all()).expect("trigger all"));
    let error = controller
        .get_error("code")
        .expect("error")
        .expect("code error");
    assert_eq!(
        error.types.keys().cloned().collect::<Vec<_>>(),
        vec!["min_length".to_owned(), "pattern".to_owned()]
    );
}

#[test]
fn resolver_errors_are_scoped_to_the_triggered_path() {
    let controller = form(json!({"email": "", "age": 12}), ValidationMode::OnSubmit)
        .with_resolver(|values: Value| async move {
            let mut errors = ErrorMap::new();
            if values["email"] == json!("") {
                errors.set(Path::root().key("email"), FieldError::required("email"));
            }
            if values["age"].as_u64().is_some_and(|age| age < 18) {
                errors.set(Path::root().key("age"), FieldError::new("min", "adults only"));
            }
            Ok::<ErrorMap, ResolverFailure>(errors)
        });

    assert!(!block_on(controller.trigger(["email"])).expect("trigger email"));
    let errors = controller.errors().expect("errors");
    assert!(errors.contains(&p("email")));
    assert!(!errors.contains(&p("age")));

    assert!(!block_on(controller.trigger_all()).expect("trigger all"));
    assert_eq!(controller.errors().expect("errors").len(), 2);

    block_on(controller.set_value("email", json!("a@b.c"), SetValueOptions::default()))
        .expect("set email");
    block_on(controller.set_value("age", json!(30), SetValueOptions::default()))
        .expect("set age");
    assert!(block_on(controller.trigger_all()).expect("trigger all"));
    assert!(controller.errors().expect("errors").is_empty());
}

#[test]
fn resolver_failure_is_recorded_at_root() {
    let controller = form(json!({}), ValidationMode::OnSubmit).with_resolver(|_values: Value| async {
        Err::<ErrorMap, ResolverFailure>(ResolverFailure("schema unavailable".to_owned()))
    });

    assert!(!block_on(controller.trigger_all()).expect("trigger all"));
    let errors = controller.errors().expect("errors");
    let root = errors.get(&ErrorMap::root_path()).expect("root error");
    assert!(root.is_internal());
    assert_eq!(root.message, "schema unavailable");
}

#[test]
fn resolver_recovery_clears_the_root_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let controller = form(json!({}), ValidationMode::OnSubmit).with_resolver(move |_values: Value| {
        let call = counted.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                Err(ResolverFailure("schema unavailable".to_owned()))
            } else {
                Ok(ErrorMap::new())
            }
        }
    });
    controller
        .set_error(
            ErrorMap::root_path().key("server"),
            FieldError::custom("offline"),
            false,
        )
        .expect("manual root error");

    assert!(!block_on(controller.trigger_all()).expect("failing run"));
    assert!(controller.get_error(ErrorMap::root_path()).expect("error").is_some());

    assert!(block_on(controller.trigger_all()).expect("recovered run"));
    let errors = controller.errors().expect("errors");
    assert!(!errors.contains(&ErrorMap::root_path()));
    assert!(errors.contains(&p("root.server")));

    controller
        .clear_field_errors(["root.server"])
        .expect("clear manual error");
    assert!(controller.snapshot().expect("snapshot").is_valid);
}

#[test]
fn field_array_remove_keeps_indices_consistent() {
    let controller = form(json!({"users": []}), ValidationMode::OnSubmit);
    let users = controller
        .field_array("users", FieldArrayOptions::default())
        .expect("field array");

    for name in ["A", "B", "C"] {
        assert!(users.append(json!({"name": name})).expect("append"));
    }
    let minted = users.keys().expect("keys");
    assert!(users.remove(1).expect("remove"));

    assert_eq!(
        controller.get_value("users").expect("value"),
        Some(json!([{"name": "A"}, {"name": "C"}]))
    );
    let fields = users.fields().expect("fields");
    assert_eq!(
        fields.iter().map(|item| item.index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(
        fields.iter().map(|item| item.key.clone()).collect::<Vec<_>>(),
        vec![minted[0].clone(), minted[2].clone()]
    );
    assert_eq!(users.index_of(&minted[2]).expect("index"), Some(1));
    assert_eq!(users.index_of(&minted[1]).expect("index"), None);
}

#[test]
fn field_array_swap_moves_keys_with_items() {
    let controller = form(json!({"items": ["A", "B", "C"]}), ValidationMode::OnSubmit);
    let items = controller
        .field_array("items", FieldArrayOptions::default())
        .expect("field array");
    let before = items.keys().expect("keys");

    assert!(items.swap(0, 2).expect("swap"));
    assert_eq!(
        controller.get_value("items").expect("value"),
        Some(json!(["C", "B", "A"]))
    );
    let after = items.keys().expect("keys");
    assert_eq!(after[0], before[2]);
    assert_eq!(after[2], before[0]);
    assert!(
        controller
            .snapshot()
            .expect("snapshot")
            .dirty_fields
            .contains(&p("items"))
    );
    assert!(!items.swap(1, 1).expect("same index swap is a no-op"));
}

#[test]
fn field_array_insert_clamps_the_index() {
    let controller = form(json!({"items": ["A"]}), ValidationMode::OnSubmit);
    let items = controller
        .field_array("items", FieldArrayOptions::default())
        .expect("field array");

    items.insert(99, json!("X")).expect("insert past end");
    assert_eq!(
        controller.get_value("items").expect("value"),
        Some(json!(["A", "X"]))
    );
    items.insert(-5, json!("Y")).expect("insert before start");
    assert_eq!(
        controller.get_value("items").expect("value"),
        Some(json!(["Y", "A", "X"]))
    );
}

#[test]
fn field_array_operations_keep_value_and_key_lengths_equal() {
    let controller = form(json!({"tags": ["a", "b"]}), ValidationMode::OnSubmit);
    let tags = controller
        .field_array("tags", FieldArrayOptions::default())
        .expect("field array");
    let mut minted = tags.keys().expect("keys").into_iter().collect::<BTreeSet<_>>();
    let mut removed = BTreeSet::<ItemKey>::new();

    tags.prepend_all(vec![json!("x"), json!("y")]).expect("prepend");
    tags.move_item(0, 3).expect("move");
    let doomed = tags.keys().expect("keys");
    tags.remove_many([3, 0, 3]).expect("remove many");
    removed.insert(doomed[0].clone());
    removed.insert(doomed[3].clone());
    tags.update(0, json!("z")).expect("update");
    minted.extend(doomed);

    let fields = tags.fields().expect("fields");
    let values = controller
        .get_value("tags")
        .expect("value")
        .and_then(|value| value.as_array().cloned())
        .expect("tags stay a sequence");
    assert_eq!(fields.len(), values.len());
    for item in &fields {
        assert_eq!(values[item.index], item.value);
        assert_eq!(tags.index_of(&item.key).expect("index"), Some(item.index));
    }
    let live = fields.iter().map(|item| item.key.clone()).collect::<BTreeSet<_>>();
    assert_eq!(live, minted.difference(&removed).cloned().collect());
    assert_eq!(values[0], json!("z"));
}

#[test]
fn remove_all_respects_the_minimum_length() {
    let controller = form(json!({"items": [1, 2], "other": [1]}), ValidationMode::OnSubmit);
    let items = controller
        .field_array(
            "items",
            FieldArrayOptions {
                rules: ArrayRules {
                    min_length: Some(1),
                    max_length: Some(3),
                },
            },
        )
        .expect("field array");
    assert!(!items.remove_all().expect("remove all"));
    assert_eq!(items.len().expect("len"), 2);

    assert!(items.append(json!(3)).expect("append"));
    assert!(!items.append(json!(4)).expect("append past max"));
    assert_eq!(items.len().expect("len"), 3);

    let other = controller
        .field_array("other", FieldArrayOptions::default())
        .expect("field array");
    assert!(other.remove_all().expect("remove all"));
    assert!(other.is_empty().expect("empty"));
}

#[test]
fn field_array_length_rules_keep_existing_rules() {
    let controller = form(json!({"items": []}), ValidationMode::OnSubmit);
    controller
        .register("items", required("pick at least one"))
        .expect("register items");
    let items = controller
        .field_array(
            "items",
            FieldArrayOptions {
                rules: ArrayRules {
                    min_length: None,
                    max_length: Some(5),
                },
            },
        )
        .expect("field array");

    assert!(!block_on(controller.trigger(["items"])).expect("trigger empty"));
    assert_eq!(
        controller.get_error("items").expect("error").map(|error| error.kind),
        Some("required".to_owned())
    );

    for value in 0..5 {
        assert!(items.append(json!(value)).expect("append"));
    }
    assert!(block_on(controller.trigger(["items"])).expect("trigger full"));
    assert!(!items.append(json!(5)).expect("append past max"));
}

#[test]
fn remove_many_out_of_bounds_is_reported() {
    let controller = form(json!({"tags": ["a", "b"]}), ValidationMode::OnSubmit);
    let tags = controller
        .field_array("tags", FieldArrayOptions::default())
        .expect("field array");

    assert!(!tags.remove_many([5, 9]).expect("remove out of range"));
    assert_eq!(tags.len().expect("len"), 2);
    assert!(
        controller
            .diagnostics()
            .iter()
            .any(|warning| warning.contains("`remove_many`") && warning.contains("index 5"))
    );
    assert!(!tags.remove_many(Vec::new()).expect("remove nothing"));
}

#[test]
fn removed_items_drop_their_validation_tickets() {
    let controller = form(
        json!({"users": [{"name": ""}, {"name": ""}]}),
        ValidationMode::OnSubmit,
    );
    let users = controller
        .field_array("users", FieldArrayOptions::default())
        .expect("field array");
    controller
        .register("users.1.name", required("required"))
        .expect("register");
    assert!(!block_on(controller.trigger(["users.1.name"])).expect("trigger"));

    assert!(users.remove(1).expect("remove"));
    let state = controller.state.read().expect("state lock");
    assert!(
        !state
            .tickets
            .keys()
            .any(|path| path.starts_with(&p("users.1")))
    );
}

#[test]
fn field_array_edits_reindex_errors_and_supersede_validation() {
    let controller = form(
        json!({"users": [{"name": "a"}, {"name": ""}, {"name": ""}]}),
        ValidationMode::OnSubmit,
    );
    let users = controller
        .field_array("users", FieldArrayOptions::default())
        .expect("field array");
    controller
        .set_error("users.2.name", FieldError::required("name"), false)
        .expect("set error");
    controller
        .register("users.2.name", required("name"))
        .expect("register");

    users.remove(0).expect("remove");
    let errors = controller.errors().expect("errors");
    assert!(errors.contains(&p("users.1.name")));
    assert!(!errors.contains(&p("users.2.name")));
    assert!(controller.is_registered("users.1.name").expect("registered"));

    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    controller
        .register(
            "users.0.name",
            FieldOptions::new().validate(FieldValidator::future(move |_cx| {
                let gate = gate.lock().expect("gate lock").take();
                async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    Err::<(), FieldError>(FieldError::custom("stale"))
                }
            })),
        )
        .expect("register");
    let validating = controller.validate_path(p("users.0.name"), false);
    let editing = {
        let users = users.clone();
        async move {
            users.swap(0, 1).expect("swap");
            release.send(()).expect("release validator");
        }
    };
    let (outcome, ()) = block_on(async { futures::join!(validating, editing) });
    assert_eq!(outcome.expect("validation"), ValidationOutcome::Superseded);
    let errors = controller.errors().expect("errors");
    assert_eq!(
        errors.get(&p("users.0.name")).map(|error| error.kind.as_str()),
        Some("required")
    );
    assert!(!errors.contains(&p("users.1.name")));
}

#[test]
fn replacing_the_array_from_outside_remints_keys() {
    let controller = form(json!({"items": ["a"]}), ValidationMode::OnSubmit);
    let items = controller
        .field_array("items", FieldArrayOptions::default())
        .expect("field array");
    let before = items.keys().expect("keys");

    block_on(controller.set_value("items", json!(["x", "y"]), SetValueOptions::default()))
        .expect("set array");
    let after = items.keys().expect("keys");
    assert_eq!(after.len(), 2);
    assert!(!after.contains(&before[0]));

    items.replace(vec![json!("q")]).expect("replace");
    assert_eq!(items.fields().expect("fields").len(), 1);
    assert!(!items.keys().expect("keys").contains(&after[0]));
}

#[test]
fn array_ops_on_non_arrays_warn_once() {
    let controller = form(json!({"name": "Ada"}), ValidationMode::OnSubmit);
    let name = controller
        .field_array("name", FieldArrayOptions::default())
        .expect("handle");
    assert!(!name.append(json!(1)).expect("append"));
    assert!(!name.append(json!(2)).expect("append"));
    assert_eq!(controller.get_value("name").expect("value"), Some(json!("Ada")));

    let warnings = controller.diagnostics();
    assert_eq!(
        warnings
            .iter()
            .filter(|warning| warning.contains("`append`"))
            .count(),
        1
    );
}

#[test]
fn malformed_paths_degrade_to_no_ops() {
    let controller = form(json!({"a": 1}), ValidationMode::OnSubmit);
    assert_eq!(controller.get_value("a..b").expect("get"), None);
    assert_eq!(controller.get_value("a..b").expect("get"), None);
    block_on(controller.set_value("", json!(1), SetValueOptions::default())).expect("set");
    assert_eq!(controller.get_values().expect("values"), json!({"a": 1}));
    assert_eq!(controller.diagnostics().len(), 2);
}

#[test]
fn writing_through_a_primitive_is_reported() {
    let controller = form(json!({"user": "flat"}), ValidationMode::OnSubmit);
    block_on(controller.set_value("user.name", json!("Ada"), SetValueOptions::default()))
        .expect("set");
    assert_eq!(
        controller.get_value("user").expect("value"),
        Some(json!({"name": "Ada"}))
    );
    assert_eq!(controller.diagnostics().len(), 1);
}

#[test]
fn submit_handler_failure_propagates_after_cleanup() {
    let controller = form(json!({"email": "a@b.c"}), ValidationMode::OnSubmit);
    let handler = controller
        .handle_submit(|_| async { Err::<(), std::io::Error>(std::io::Error::other("boom")) });

    let result = block_on(handler.submit());
    assert!(matches!(result, Err(FormError::SubmitHandler(_))));
    let snapshot = controller.snapshot().expect("snapshot");
    assert!(!snapshot.is_submitting);
    assert!(!snapshot.is_submit_successful);
    assert!(snapshot.is_submitted);
    assert_eq!(snapshot.submit_count, 1);
}

#[test]
fn submit_handler_panic_is_reported() {
    let controller = form(json!({}), ValidationMode::OnSubmit);
    let handler = controller.handle_submit(|_| async {
        if true {
            panic!("handler exploded");
        }
        Ok::<(), std::io::Error>(())
    });

    match block_on(handler.submit()) {
        Err(FormError::SubmitHandlerPanicked(message)) => assert_eq!(message, "handler exploded"),
        other => panic!("unexpected submit result: {other:?}"),
    }
    assert!(!controller.snapshot().expect("snapshot").is_submitting);
}

#[test]
fn overlapping_submits_run_the_callback_once() {
    let controller = form(json!({"name": "Ada"}), ValidationMode::OnSubmit);
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let handler = {
        let calls = calls.clone();
        controller.handle_submit(move |_values| {
            calls.fetch_add(1, Ordering::SeqCst);
            let gate = gate.lock().expect("gate lock").take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok::<(), std::io::Error>(())
            }
        })
    };

    let observed = controller.clone();
    let (first, second, ()) = block_on(async {
        futures::join!(handler.submit(), handler.submit(), async move {
            assert!(observed.snapshot().expect("snapshot").is_submitting);
            release.send(()).expect("release submit");
        })
    });

    assert_eq!(first.expect("first submit"), SubmitOutcome::Submitted);
    assert!(matches!(second, Err(FormError::AlreadySubmitting)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let snapshot = controller.snapshot().expect("snapshot");
    assert!(snapshot.is_submit_successful);
    assert_eq!(snapshot.submit_count, 1);
}

#[test]
fn invalid_submit_focuses_the_first_error_and_calls_on_invalid() {
    let controller = form(json!({"alpha": "", "beta": ""}), ValidationMode::OnSubmit);
    let alpha = Arc::new(RecordingElement::default());
    let beta = Arc::new(RecordingElement::default());
    controller
        .register("beta", required("beta"))
        .expect("register beta");
    controller
        .register("alpha", required("alpha"))
        .expect("register alpha");
    controller
        .attach_element("alpha", alpha.clone())
        .expect("attach alpha");
    controller
        .attach_element("beta", beta.clone())
        .expect("attach beta");

    let reported = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let reported = reported.clone();
        controller
            .handle_submit(|_| async { Ok::<(), std::io::Error>(()) })
            .on_invalid(move |errors| {
                reported
                    .lock()
                    .expect("reported lock")
                    .extend(errors.paths().map(ToString::to_string));
            })
    };

    assert_eq!(
        block_on(handler.submit()).expect("submit"),
        SubmitOutcome::Invalid
    );
    assert_eq!(alpha.focused.load(Ordering::SeqCst), 1);
    assert_eq!(beta.focused.load(Ordering::SeqCst), 0);
    assert_eq!(
        *reported.lock().expect("reported lock"),
        vec!["alpha".to_owned(), "beta".to_owned()]
    );
}

#[test]
fn disabled_fields_skip_validation_and_submission() {
    let controller = form(json!({"name": "Ada", "nickname": ""}), ValidationMode::OnSubmit);
    controller
        .register("nickname", required("nickname").disabled(true))
        .expect("register");

    let submitted = Arc::new(Mutex::new(None));
    let handler = {
        let submitted = submitted.clone();
        controller.handle_submit(move |values| {
            *submitted.lock().expect("submitted lock") = Some(values);
            async { Ok::<(), std::io::Error>(()) }
        })
    };
    assert_eq!(
        block_on(handler.submit()).expect("submit"),
        SubmitOutcome::Submitted
    );
    assert_eq!(
        *submitted.lock().expect("submitted lock"),
        Some(json!({"name": "Ada"}))
    );
}

#[test]
fn reset_restores_defaults_and_clears_state() {
    let controller = form(json!({"user": {"name": "a"}}), ValidationMode::OnSubmit);
    block_on(controller.set_value(
        "user.name",
        json!("b"),
        SetValueOptions {
            should_dirty: true,
            should_touch: true,
            ..SetValueOptions::default()
        },
    ))
    .expect("set");
    controller
        .set_error("user.name", FieldError::custom("taken"), false)
        .expect("set error");
    let state = controller.get_field_state("user").expect("field state");
    assert!(state.is_dirty && state.is_touched && state.invalid);

    controller
        .reset(None, KeepStateOptions::default())
        .expect("reset");
    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.values, snapshot.default_values);
    assert!(!snapshot.is_dirty);
    assert!(snapshot.touched_fields.is_empty());
    assert!(snapshot.is_valid);

    let mut next = json!({"user": {"name": "c"}});
    controller
        .reset(Some(next.clone()), KeepStateOptions::default())
        .expect("reset with values");
    next["user"]["name"] = json!("mutated");
    assert_eq!(
        controller.default_values().expect("defaults"),
        json!({"user": {"name": "c"}})
    );
}

#[test]
fn reset_can_keep_dirty_values() {
    let controller = form(json!({"a": 1, "b": 2}), ValidationMode::OnSubmit);
    let dirty = SetValueOptions {
        should_dirty: true,
        ..SetValueOptions::default()
    };
    block_on(controller.set_value("a", json!(10), dirty)).expect("set a");
    block_on(controller.set_value("b", json!(20), SetValueOptions::default())).expect("set b");

    controller
        .reset(
            None,
            KeepStateOptions {
                keep_dirty_values: true,
                ..KeepStateOptions::default()
            },
        )
        .expect("reset");
    assert_eq!(controller.get_values().expect("values"), json!({"a": 10, "b": 2}));
    assert!(controller.snapshot().expect("snapshot").is_dirty);
}

#[test]
fn reset_field_uses_a_new_default_when_given() {
    let controller = form(json!({"name": "a", "age": 1}), ValidationMode::OnSubmit);
    block_on(controller.change("name", json!("b"))).expect("change");
    assert!(controller.get_field_state("name").expect("state").is_dirty);

    controller
        .reset_field(
            "name",
            ResetFieldOptions {
                default_value: Some(json!("z")),
                ..ResetFieldOptions::default()
            },
        )
        .expect("reset field");
    assert_eq!(controller.get_value("name").expect("value"), Some(json!("z")));
    assert!(!controller.get_field_state("name").expect("state").is_dirty);
}

#[test]
fn setting_a_value_back_to_its_default_clears_dirty() {
    let controller = form(json!({"name": "a"}), ValidationMode::OnSubmit);
    block_on(controller.change("name", json!("b"))).expect("change");
    assert!(controller.snapshot().expect("snapshot").is_dirty);
    block_on(controller.change("name", json!("a"))).expect("change back");
    assert!(!controller.snapshot().expect("snapshot").is_dirty);
}

#[test]
fn manual_errors_merge_replace_and_clear() {
    let controller = form(json!({}), ValidationMode::OnSubmit);
    controller
        .set_errors([
            ("a", FieldError::custom("a")),
            ("root.server", FieldError::custom("offline")),
        ])
        .expect("set errors");
    controller
        .set_errors([("b", FieldError::custom("b"))])
        .expect("merge errors");
    assert_eq!(controller.errors().expect("errors").len(), 3);
    assert!(!controller.snapshot().expect("snapshot").is_valid);

    controller.clear_field_errors(["a"]).expect("clear a");
    assert!(controller.get_error("a").expect("error").is_none());

    controller
        .replace_errors(ErrorMap::from_iter([(p("c"), FieldError::custom("c"))]))
        .expect("replace");
    assert_eq!(
        controller.errors().expect("errors").paths().cloned().collect::<Vec<_>>(),
        vec![p("c")]
    );

    controller.clear_errors().expect("clear");
    assert!(controller.snapshot().expect("snapshot").is_valid);
}

#[test]
fn load_default_values_records_failures() {
    let controller = form(json!({}), ValidationMode::OnSubmit);
    let reported = Arc::new(Mutex::new(None));
    let on_error = {
        let reported = reported.clone();
        Box::new(move |message: &str| {
            *reported.lock().expect("reported lock") = Some(message.to_owned());
        })
    };

    let loaded = block_on(controller.load_default_values(
        async { Err::<Value, String>("offline".to_owned()) },
        KeepStateOptions::default(),
        Some(on_error),
    ))
    .expect("load never fails");
    assert!(!loaded);
    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.default_values_error.as_deref(), Some("offline"));
    assert!(!snapshot.is_loading);
    assert_eq!(
        reported.lock().expect("reported lock").as_deref(),
        Some("offline")
    );

    let loaded = block_on(controller.load_default_values(
        async { Ok::<Value, String>(json!({"name": "Ada"})) },
        KeepStateOptions::default(),
        None,
    ))
    .expect("load");
    assert!(loaded);
    let snapshot = controller.snapshot().expect("snapshot");
    assert_eq!(snapshot.values, json!({"name": "Ada"}));
    assert_eq!(snapshot.default_values, json!({"name": "Ada"}));
    assert_eq!(snapshot.default_values_error, None);
}

#[test]
fn subscribers_and_watchers_are_notified() {
    let controller = form(json!({"name": "", "age": 1}), ValidationMode::OnSubmit);
    let snapshots = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let id = {
        let snapshots = snapshots.clone();
        controller
            .subscribe(move |_snapshot| {
                snapshots.fetch_add(1, Ordering::SeqCst);
            })
            .expect("subscribe")
    };
    {
        let seen = seen.clone();
        controller
            .watch("name", move |value| {
                seen.lock().expect("seen lock").push(value.cloned());
            })
            .expect("watch");
    }

    block_on(controller.set_value("name", json!("Ada"), SetValueOptions::default()))
        .expect("set name");
    block_on(controller.set_value("age", json!(2), SetValueOptions::default())).expect("set age");
    assert_eq!(
        *seen.lock().expect("seen lock"),
        vec![Some(json!("Ada"))]
    );

    let before = snapshots.load(Ordering::SeqCst);
    assert!(before >= 2);
    assert!(controller.unsubscribe(id).expect("unsubscribe"));
    block_on(controller.set_value("age", json!(3), SetValueOptions::default())).expect("set age");
    assert_eq!(snapshots.load(Ordering::SeqCst), before);
}

#[test]
fn uncontrolled_elements_receive_engine_writes() {
    let controller = form(json!({"name": "Ada", "bio": ""}), ValidationMode::OnSubmit);
    let name = Arc::new(RecordingElement::default());
    let bio = Arc::new(RecordingElement::default());
    controller
        .attach_element("name", name.clone())
        .expect("attach name");
    controller
        .register("bio", FieldOptions::new().controlled())
        .expect("register bio");
    controller
        .attach_element("bio", bio.clone())
        .expect("attach bio");
    assert_eq!(name.last_written(), Some(Some(json!("Ada"))));

    block_on(controller.set_value("name", json!("Grace"), SetValueOptions::default()))
        .expect("set name");
    assert_eq!(name.last_written(), Some(Some(json!("Grace"))));
    controller
        .reset(None, KeepStateOptions::default())
        .expect("reset");
    assert_eq!(name.last_written(), Some(Some(json!("Ada"))));
    assert_eq!(bio.last_written(), None);

    assert!(controller.set_focus("name", true).expect("focus"));
    assert!(!controller.set_focus("missing", false).expect("focus"));
    assert_eq!(name.focused.load(Ordering::SeqCst), 1);
}

#[test]
fn unregister_and_detach_drop_field_state() {
    let controller = FormController::new(
        json!({"name": "Ada", "email": "a@b.c"}),
        FormOptions {
            should_unregister: true,
            ..FormOptions::default()
        },
    );
    controller
        .register("name", FieldOptions::new())
        .expect("register name");
    controller
        .register("email", FieldOptions::new().should_unregister(false))
        .expect("register email");
    controller
        .set_error("name", FieldError::custom("bad"), false)
        .expect("set error");

    controller.detach_field("email").expect("detach email");
    assert!(controller.is_registered("email").expect("registered"));
    assert_eq!(controller.get_value("email").expect("value"), Some(json!("a@b.c")));

    controller.detach_field("name").expect("detach name");
    assert!(!controller.is_registered("name").expect("registered"));
    assert_eq!(controller.get_value("name").expect("value"), None);
    assert!(controller.get_error("name").expect("error").is_none());
    assert_eq!(
        controller.default_values().expect("defaults")["name"],
        json!("Ada")
    );

    controller
        .unregister("email", UnregisterOptions::default())
        .expect("unregister");
    assert_eq!(controller.get_values().expect("values"), json!({}));
    assert_eq!(controller.registered_paths().expect("paths"), Vec::<Path>::new());
}

#[test]
fn registering_an_unknown_path_warns() {
    let controller = form(json!({"name": ""}), ValidationMode::OnSubmit);
    controller
        .register("nmae", FieldOptions::new())
        .expect("register");
    controller
        .register("name", FieldOptions::new())
        .expect("register");
    let warnings = controller.diagnostics();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("nmae"));
    assert_eq!(
        controller.registered_paths().expect("paths"),
        vec![p("nmae"), p("name")]
    );
}

#[test]
fn typed_models_round_trip_through_the_controller() {
    let model = ProfileForm {
        email: "a@b.c".to_owned(),
        display_name: "Ada".to_owned(),
        age: 36,
    };
    let controller =
        FormController::from_model(&model, FormOptions::default()).expect("from model");
    let fields = ProfileForm::fields();
    assert_eq!(fields.display_name(), p("displayName"));

    block_on(controller.set_value(fields.age(), json!(37), SetValueOptions::default()))
        .expect("set age");
    let values = controller.values_as::<ProfileForm>().expect("typed values");
    assert_eq!(
        values,
        ProfileForm {
            age: 37,
            ..model
        }
    );

    block_on(controller.set_value(fields.age(), json!("old"), SetValueOptions::default()))
        .expect("set age");
    assert!(matches!(
        controller.values_as::<ProfileForm>(),
        Err(FormError::Model(_))
    ));
}

#[test]
fn options_load_from_json() {
    let options: FormOptions = serde_json::from_value(json!({
        "validate_mode": "on_touched",
        "criteria_mode": "all",
    }))
    .expect("options");
    assert_eq!(options.validate_mode, ValidationMode::OnTouched);
    assert_eq!(options.revalidate_mode, RevalidateMode::OnChange);
    assert_eq!(options.criteria_mode, CriteriaMode::All);
    assert!(options.focus_first_error_on_submit);
}

#[test]
fn forms_get_distinct_ids() {
    let first = form(json!({}), ValidationMode::OnSubmit);
    let second = form(json!({}), ValidationMode::OnSubmit);
    assert_ne!(
        first.form_id().expect("id"),
        second.form_id().expect("id")
    );
    assert_eq!(first.form_id().expect("id"), first.clone().form_id().expect("id"));
}
