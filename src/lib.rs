//! pyslice: self-contained Python class extraction, skeletons and sandbox validation.

pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod parser;
pub mod sandbox;
pub mod scan;

pub use error::{PysliceError, Result};
pub use extract::{extract, list_classes};
pub use parser::skeletonize;
pub use sandbox::{validate, validate_with, Sandbox, Verdict};
