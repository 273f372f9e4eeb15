//! Local filesystem capability.
//!
//! Context assembly reads local files through [`LocalFs`] rather than calling
//! `std::fs` directly, so callers (and tests) decide what "the local disk" is.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kind of a local filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  File,
  Dir,
  Other,
}

/// The subset of file metadata context assembly needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMetadata {
  pub kind: EntryKind,
  /// Permission bits (`0o777` mask).
  pub mode: u32,
  pub len: u64,
}

/// Read access to a local filesystem.
pub trait LocalFs: Send + Sync {
  /// Metadata for `path`, following symlinks.
  fn metadata(&self, path: &Path) -> io::Result<LocalMetadata>;

  /// Immediate children of a directory, sorted by file name.
  fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

  /// Full contents of a regular file.
  fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// [`LocalFs`] backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl LocalFs for HostFs {
  fn metadata(&self, path: &Path) -> io::Result<LocalMetadata> {
    let meta = fs::metadata(path)?;
    let kind = if meta.is_dir() {
      EntryKind::Dir
    } else if meta.is_file() {
      EntryKind::File
    } else {
      EntryKind::Other
    };
    Ok(LocalMetadata {
      kind,
      mode: permission_bits(&meta, kind),
      len: meta.len(),
    })
  }

  fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children = fs::read_dir(path)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<io::Result<Vec<_>>>()?;
    children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(children)
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
  }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata, _kind: EntryKind) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata, kind: EntryKind) -> u32 {
  match kind {
    EntryKind::Dir => 0o755,
    _ => 0o644,
  }
}
