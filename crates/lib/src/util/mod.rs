//! Shared utilities.
//!
//! Common utilities used across the crate including hashing, name parsing
//! and test helpers.

pub mod hash;
pub mod named;

#[cfg(test)]
pub mod testutil;
