//! Shared utilities.
//!
//! Hashing for bundled artifacts and filesystem helpers used while staging
//! the build workspace.

pub mod fs;
pub mod hash;
