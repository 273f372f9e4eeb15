//! Shared utilities.
//!
//! Content hashing for the in-memory object store, archive path handling, and
//! test fakes.

pub mod hash;
pub mod path;

#[cfg(test)]
pub mod testutil;
