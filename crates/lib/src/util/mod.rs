//! Shared utilities.
//!
//! Hashing, retry helpers and test fixtures used across the crate.

pub mod hash;
pub mod retry;

#[cfg(test)]
pub mod testutil;
