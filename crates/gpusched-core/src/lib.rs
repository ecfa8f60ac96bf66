//! gpusched-core: Core types for the gpusched admission scheduler
//!
//! This crate provides the types shared by every gpusched component:
//! - The resource pool and slot model
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod pool;

pub use config::*;
pub use error::*;
pub use pool::*;
