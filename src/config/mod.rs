//! Configuration module
//!
//! Loads and validates the YAML file that sets collaborator endpoints,
//! exercise timers and coaching.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, ConfigOverrides, LoadResult, LoadWarning};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
