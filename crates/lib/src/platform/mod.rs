//! Host platform access: home directory resolution and local file reads.

pub mod fs;
pub mod paths;

pub use fs::{EntryKind, HostFs, LocalFs, LocalMetadata};
