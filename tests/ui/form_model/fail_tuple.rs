#![allow(dead_code)]

use calmform::form::FormModel;

#[derive(FormModel)]
struct Point(u32, u32);

fn main() {}
