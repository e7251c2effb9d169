//! Shared utilities
//!
//! # Modules
//!
//! - `values`: tagged name/value collections used for process parameters

pub mod values;

pub use values::{NamedValue, ValueSet};
