//! gpusched-scheduler: Admission of tasks onto the shared pool
//!
//! This crate decides which slots a task gets and claims them:
//! - Preference and force selection policy
//! - The polling admission loop over the state file

pub mod admission;
pub mod selection;

pub use admission::Admission;
pub use selection::{select, AdmissionRequest, Selection};
