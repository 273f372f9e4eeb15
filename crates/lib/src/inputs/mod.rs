//! Repository acquisition.
//!
//! This module handles fetching the git repositories declared in a build
//! matrix into isolated in-memory stores.
//!
//! # Modules
//!
//! - [`store`] - In-memory filesystem tree and object store per repository
//! - [`fetch`] - The git clone collaborator and its `gix` implementation
//! - [`manager`] - Concurrent fetch of every declared repository
//! - [`types`] - Folder naming and ref override rules

pub mod fetch;
pub mod manager;
pub mod store;
mod types;

pub use fetch::{CloneError, GitCloner, GixCloner};
pub use manager::{FetchError, FetchManager};
pub use store::{RepositoryStore, StoreEntry, StoreError, TreeNode};
pub use types::*;
