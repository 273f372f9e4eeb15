//! The build context archive.
//!
//! A [`BuildContext`] is an append-only tar stream. Entries are written with
//! fixed metadata (mtime 0, uid/gid 0, no user or group names) so identical
//! inputs always produce identical bytes. The archive must be sealed before it
//! can be read back, and nothing can be appended afterwards.

use std::collections::HashSet;
use std::io;

use tar::{Builder, EntryType, Header};
use tracing::trace;

use super::ContextError;
use crate::util::path::normalize_relative;

enum State {
  Open(Builder<Vec<u8>>),
  Sealed(Vec<u8>),
  /// A write failed mid-entry; the stream cannot be trusted.
  Broken,
}

/// An ordered, sealable tar stream of context entries.
pub struct BuildContext {
  state: State,
  entries: Vec<String>,
  seen: HashSet<String>,
}

impl Default for BuildContext {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for BuildContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildContext")
      .field("entries", &self.entries)
      .field("sealed", &self.is_sealed())
      .finish()
  }
}

impl BuildContext {
  pub fn new() -> Self {
    Self {
      state: State::Open(Builder::new(Vec::new())),
      entries: Vec::new(),
      seen: HashSet::new(),
    }
  }

  /// Append a regular file.
  pub fn append_file(&mut self, path: &str, mode: u32, content: &[u8]) -> Result<(), ContextError> {
    let mut header = base_header(EntryType::Regular, mode);
    header.set_size(content.len() as u64);
    self.append(path, header, |builder, header, name| {
      builder.append_data(header, name, content)
    })
  }

  /// Append a directory entry.
  pub fn append_dir(&mut self, path: &str, mode: u32) -> Result<(), ContextError> {
    let header = base_header(EntryType::Directory, mode);
    self.append(path, header, |builder, header, name| {
      builder.append_data(header, name, io::empty())
    })
  }

  /// Append a symbolic link pointing at `target`.
  pub fn append_symlink(&mut self, path: &str, target: &str) -> Result<(), ContextError> {
    let header = base_header(EntryType::Symlink, 0o777);
    self.append(path, header, |builder, header, name| {
      builder.append_link(header, name, target)
    })
  }

  fn append<F>(&mut self, path: &str, mut header: Header, write: F) -> Result<(), ContextError>
  where
    F: FnOnce(&mut Builder<Vec<u8>>, &mut Header, &str) -> io::Result<()>,
  {
    let builder = match &mut self.state {
      State::Open(builder) => builder,
      State::Sealed(_) => return Err(ContextError::InvalidState("append to a sealed context")),
      State::Broken => return Err(ContextError::InvalidState("append to a broken context")),
    };

    let name = normalize_relative(path).ok_or_else(|| ContextError::UnsafePath(path.to_string()))?;
    if self.seen.contains(&name) {
      return Err(ContextError::DuplicateEntry(name));
    }

    if let Err(source) = write(builder, &mut header, &name) {
      self.state = State::Broken;
      return Err(ContextError::Archive { path: name, source });
    }

    trace!(path = %name, "context entry");
    self.seen.insert(name.clone());
    self.entries.push(name);
    Ok(())
  }

  /// Finish the tar stream. No entries can be appended afterwards.
  pub fn seal(&mut self) -> Result<(), ContextError> {
    match std::mem::replace(&mut self.state, State::Broken) {
      State::Open(builder) => {
        let bytes = builder.into_inner().map_err(|source| ContextError::Archive {
          path: String::new(),
          source,
        })?;
        self.state = State::Sealed(bytes);
        Ok(())
      }
      State::Sealed(bytes) => {
        self.state = State::Sealed(bytes);
        Err(ContextError::InvalidState("context is already sealed"))
      }
      State::Broken => Err(ContextError::InvalidState("seal of a broken context")),
    }
  }

  pub fn is_sealed(&self) -> bool {
    matches!(self.state, State::Sealed(_))
  }

  /// The sealed archive bytes.
  pub fn bytes(&self) -> Result<&[u8], ContextError> {
    match &self.state {
      State::Sealed(bytes) => Ok(bytes),
      _ => Err(ContextError::InvalidState("read of an unsealed context")),
    }
  }

  /// Consume the context, returning the sealed archive bytes.
  pub fn into_bytes(self) -> Result<Vec<u8>, ContextError> {
    match self.state {
      State::Sealed(bytes) => Ok(bytes),
      _ => Err(ContextError::InvalidState("read of an unsealed context")),
    }
  }

  /// Archive paths in the order they were appended.
  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

fn base_header(kind: EntryType, mode: u32) -> Header {
  let mut header = Header::new_gnu();
  header.set_entry_type(kind);
  header.set_mode(mode & 0o7777);
  header.set_size(0);
  header.set_mtime(0);
  header.set_uid(0);
  header.set_gid(0);
  header
}
