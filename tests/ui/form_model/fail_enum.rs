#![allow(dead_code)]

use calmform::form::FormModel;

#[derive(FormModel)]
enum Step {
    Account,
    Profile,
}

fn main() {}
