//! gpusched-store: Shared pool state
//!
//! This crate provides the state file every scheduler process shares:
//! - Advisory `flock` locking with retry on contention
//! - Whole-pool read-modify-write under the lock
//! - The parallel-array JSON layout of the file

pub mod layout;
pub mod state;

pub use state::{PoolLock, StateStore};
