//! Small value types shared across the nucleus crates.

mod id;

pub use id::{Id, IdTag};
