//! Git clone into an in-memory repository store.
//!
//! The engine only needs the tree at one ref, so clones are shallow (depth 1)
//! and limited to that ref. [`GixCloner`] clones into a temporary directory
//! with `gix`, copies the checked-out worktree into the store, and lets the
//! temporary directory go.

use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::store::{RepositoryStore, StoreError};
use crate::consts::GIT_DIR_NAME;

/// Errors that can occur while cloning a repository.
#[derive(Debug, Error)]
pub enum CloneError {
  /// Failed to create the scratch directory for the checkout.
  #[error("failed to create scratch directory: {0}")]
  ScratchDir(#[source] std::io::Error),

  /// The URL or ref could not be turned into a clone request.
  #[error("invalid clone request for '{url}': {source}")]
  Prepare {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to fetch from the remote.
  #[error("failed to fetch '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to check out the fetched ref.
  #[error("failed to checkout '{reference}': {source}")]
  Checkout {
    reference: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to resolve HEAD after checkout.
  #[error("failed to resolve HEAD: {0}")]
  ResolveHead(String),

  /// Failed to read the checked-out worktree.
  #[error("failed to read '{path}': {source}")]
  ReadWorktree {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The worktree could not be stored.
  #[error(transparent)]
  Store(#[from] StoreError),

  /// Another fetch failed and this one was told to stop.
  #[error("interrupted")]
  Interrupted,

  /// The fetch did not finish in time.
  #[error("timed out after {0:?}")]
  TimedOut(Duration),

  /// The clone task panicked or was cancelled.
  #[error("clone task failed: {0}")]
  Task(String),
}

/// Clones one repository at one ref into a store.
///
/// Implementations must check `interrupt` and return
/// [`CloneError::Interrupted`] once it is set.
pub trait GitCloner: Send + Sync + 'static {
  fn fetch_into(
    &self,
    url: &str,
    reference: &str,
    store: &mut RepositoryStore,
    interrupt: &AtomicBool,
  ) -> Result<(), CloneError>;
}

/// [`GitCloner`] backed by `gix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GixCloner;

impl GitCloner for GixCloner {
  fn fetch_into(
    &self,
    url: &str,
    reference: &str,
    store: &mut RepositoryStore,
    interrupt: &AtomicBool,
  ) -> Result<(), CloneError> {
    let scratch = tempfile::Builder::new()
      .prefix("frontbuild-clone-")
      .tempdir()
      .map_err(CloneError::ScratchDir)?;

    info!(url, reference, "cloning repository");
    let commit = shallow_clone(url, reference, scratch.path(), interrupt)?;
    debug!(url, commit = %commit, "checked out");

    load_worktree(scratch.path(), store, interrupt)?;
    store.set_commit(commit);
    Ok(())
  }
}

/// Clone `url` at `reference` with depth 1 into `dest` and return the commit id.
fn shallow_clone(url: &str, reference: &str, dest: &Path, interrupt: &AtomicBool) -> Result<String, CloneError> {
  let prepare_err = |e: Box<dyn std::error::Error + Send + Sync>| CloneError::Prepare {
    url: url.to_string(),
    source: e,
  };

  let mut prepared = gix::prepare_clone(url, dest)
    .map_err(|e| prepare_err(Box::new(e)))?
    .with_shallow(gix::remote::fetch::Shallow::DepthAtRemote(NonZeroU32::MIN))
    .with_ref_name(Some(reference))
    .map_err(|e| prepare_err(Box::new(e)))?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, interrupt)
    .map_err(|e| {
      if interrupt.load(Ordering::Relaxed) {
        CloneError::Interrupted
      } else {
        CloneError::Fetch {
          url: url.to_string(),
          source: Box::new(e),
        }
      }
    })?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, interrupt)
    .map_err(|e| CloneError::Checkout {
      reference: reference.to_string(),
      source: Box::new(e),
    })?;

  let commit = repo.head_commit().map_err(|e| CloneError::ResolveHead(e.to_string()))?;

  Ok(commit.id.to_string())
}

/// Copy a checked-out worktree (minus `.git`) into `store`.
pub fn load_worktree(root: &Path, store: &mut RepositoryStore, interrupt: &AtomicBool) -> Result<(), CloneError> {
  let walker = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name() != GIT_DIR_NAME);

  for entry in walker {
    if interrupt.load(Ordering::Relaxed) {
      return Err(CloneError::Interrupted);
    }

    let entry = entry.map_err(|e| CloneError::ReadWorktree {
      path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
      source: e.into(),
    })?;
    let read_err = |source| CloneError::ReadWorktree {
      path: entry.path().to_path_buf(),
      source,
    };

    let rel = entry
      .path()
      .strip_prefix(root)
      .map(|p| p.to_string_lossy().replace('\\', "/"))
      .unwrap_or_default();
    let file_type = entry.file_type();

    if file_type.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(read_err)?;
      store.symlink(&rel, target.to_string_lossy().into_owned())?;
    } else if file_type.is_dir() {
      let meta = entry.metadata().map_err(|e| read_err(e.into()))?;
      store.create_dir(&rel, mode_of(&meta, 0o755))?;
    } else if file_type.is_file() {
      let meta = entry.metadata().map_err(|e| read_err(e.into()))?;
      let content = fs::read(entry.path()).map_err(read_err)?;
      store.write_file(&rel, mode_of(&meta, 0o644), content)?;
    }
  }

  Ok(())
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata, _default: u32) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata, default: u32) -> u32 {
  default
}
