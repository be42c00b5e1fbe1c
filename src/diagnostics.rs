//! Developer-misuse warnings.
//!
//! Misuse never fails an operation: the operation degrades to a no-op and the
//! problem is logged once per distinct message for the owning form.

use std::sync::Mutex;

use thiserror::Error;

use crate::path::{Path, PathError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Misuse {
    #[error("malformed path: {0}")]
    MalformedPath(PathError),
    #[error("write to `{target}` replaced a primitive at `{at}` with a container")]
    WriteThroughPrimitive { target: Path, at: Path },
    #[error("registered path `{path}` is not present in the form values or defaults")]
    UnknownPath { path: Path },
    #[error("`{op}` called on `{path}`, which does not hold a sequence")]
    NotAnArray { op: &'static str, path: Path },
    #[error("`{op}` on `{path}`: index {index} is out of bounds for length {len}")]
    IndexOutOfBounds {
        op: &'static str,
        path: Path,
        index: usize,
        len: usize,
    },
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    seen: Mutex<Vec<String>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `misuse` unless the same message was already reported. Returns
    /// whether a warning was emitted.
    pub fn warn_once(&self, misuse: &Misuse) -> bool {
        let message = misuse.to_string();
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.contains(&message) {
            return false;
        }
        tracing::warn!(target: "calmform", %message, "form misuse");
        seen.push(message);
        true
    }

    /// Every distinct warning reported so far, oldest first.
    pub fn messages(&self) -> Vec<String> {
        match self.seen.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
