//! crossci Core
//!
//! Core domain types and error handling for crossci.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: workflow definitions, trigger events,
//! filter patterns, expression interpolation and run reports.

pub mod error;
pub mod event;
pub mod ids;
pub mod interpolation;
pub mod pattern;
pub mod run;
pub mod validation;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
