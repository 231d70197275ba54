//! Test support for the storage engine workspace: isolated database
//! contexts rooted in temporary directories, plus small row and
//! projection builders shared by the scenario tests.

pub mod context;
pub mod fixtures;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::context::*;
    pub use crate::fixtures::*;
}
