#![allow(dead_code)]

use calmform::form::FormModel;

#[derive(FormModel)]
struct Draft<T> {
    value: T,
}

fn main() {}
