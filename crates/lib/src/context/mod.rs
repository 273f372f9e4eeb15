//! Build context assembly.
//!
//! The build context is a single tar stream combining, in this order:
//!
//! 1. The build file at `Dockerfile`
//! 2. Declared local files and directories, in declaration order
//! 3. Each fetched repository under its folder name, ordered by folder
//!
//! # Modules
//!
//! - [`archive`] - The sealable tar stream
//! - [`assemble`] - Ordering and path rules for local files and repositories

pub mod archive;
pub mod assemble;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::inputs::StoreError;

pub use archive::BuildContext;
pub use assemble::{ContextAssembler, folder_layout};

/// Errors that can occur while assembling a build context.
#[derive(Debug, Error)]
pub enum ContextError {
  /// A declared local path could not be read.
  #[error("cannot access '{path}': {source}")]
  FileAccess {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A `~/` path was declared but no home directory is known.
  #[error("cannot resolve home directory for '{path}'")]
  UserResolution { path: String },

  /// Two repositories map to the same context folder.
  #[error("repositories '{first}' and '{second}' both map to folder '{folder}'")]
  NameCollision {
    folder: String,
    first: String,
    second: String,
  },

  /// A path would land outside the context root.
  #[error("unsafe context path '{0}'")]
  UnsafePath(String),

  /// A path was appended twice.
  #[error("duplicate context entry '{0}'")]
  DuplicateEntry(String),

  /// The context was used out of order (append after seal, read before seal).
  #[error("invalid context state: {0}")]
  InvalidState(&'static str),

  /// Writing to the archive failed.
  #[error("failed to write context entry '{path}': {source}")]
  Archive {
    path: String,
    #[source]
    source: io::Error,
  },

  /// A repository store is internally inconsistent.
  #[error(transparent)]
  Store(#[from] StoreError),
}
