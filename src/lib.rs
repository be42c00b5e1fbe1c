pub mod diagnostics;
pub mod form;
pub mod id;
pub mod path;
pub mod prelude;

pub use path::{IntoPath, Path, PathError, Seg};

#[cfg(test)]
mod test_public_api;
