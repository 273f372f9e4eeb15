//! In-memory repository store.
//!
//! Each declared repository is fetched into its own [`RepositoryStore`]: a
//! filesystem tree whose file nodes point into a content-addressed object
//! store. Nothing is written to disk and nothing outlives the run.
//!
//! # Layout
//!
//! ```text
//! tree (path -> node)                 objects (id -> bytes)
//!   src                  Dir            a1b2c3...  "fn main() {}"
//!   src/main.rs          File(a1b2c3)   d4e5f6...  "# readme"
//!   README.md            File(d4e5f6)
//!   docs/latest          Symlink("v2")
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

use crate::platform::{EntryKind, LocalFs, LocalMetadata};
use crate::util::hash::ObjectHash;
use crate::util::path::{join, normalize_relative};

/// Default mode for directories created implicitly as parents.
const IMPLICIT_DIR_MODE: u32 = 0o755;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The path is absolute, empty, or escapes the store root.
  #[error("invalid store path '{0}'")]
  InvalidPath(String),

  /// A parent component of the path is not a directory.
  #[error("cannot create '{path}': '{parent}' is not a directory")]
  NotADirectory { path: String, parent: String },

  /// The path already exists with a different kind.
  #[error("'{0}' already exists")]
  AlreadyExists(String),

  /// Store entry not found.
  #[error("store entry not found: {0}")]
  NotFound(String),

  /// A file node references a blob missing from the object store.
  #[error("object {object} for '{path}' is missing from the object store")]
  MissingObject { path: String, object: ObjectHash },
}

/// A node in the in-memory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
  Dir { mode: u32 },
  File { mode: u32, object: ObjectHash, size: u64 },
  Symlink { target: String },
}

impl TreeNode {
  pub fn is_dir(&self) -> bool {
    matches!(self, TreeNode::Dir { .. })
  }
}

/// One entry produced by [`RepositoryStore::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
  /// Store-relative path, `/`-separated.
  pub path: String,
  pub node: TreeNode,
}

/// Content-addressed blob storage.
#[derive(Debug, Default, Clone)]
pub struct ObjectStore {
  blobs: HashMap<ObjectHash, Vec<u8>>,
}

impl ObjectStore {
  /// Store a blob, returning its id. Identical content is stored once.
  pub fn put(&mut self, content: Vec<u8>) -> ObjectHash {
    let id = ObjectHash::of_bytes(&content);
    self.blobs.entry(id.clone()).or_insert(content);
    id
  }

  pub fn get(&self, id: &ObjectHash) -> Option<&[u8]> {
    self.blobs.get(id).map(Vec::as_slice)
  }

  /// Number of distinct blobs.
  pub fn len(&self) -> usize {
    self.blobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blobs.is_empty()
  }
}

/// Filesystem tree keyed by normalized relative path. The root is implicit.
#[derive(Debug, Default, Clone)]
pub struct MemTree {
  nodes: BTreeMap<String, TreeNode>,
}

impl MemTree {
  pub fn get(&self, path: &str) -> Option<&TreeNode> {
    self.nodes.get(path)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Immediate children of `dir` (`""` for the root), sorted by name.
  pub fn children(&self, dir: &str) -> Vec<(&str, &TreeNode)> {
    let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
    self
      .nodes
      .range(prefix.clone()..)
      .take_while(|(path, _)| path.starts_with(&prefix))
      .filter_map(|(path, node)| {
        let name = &path[prefix.len()..];
        (!name.contains('/')).then_some((name, node))
      })
      .collect()
  }

  /// Insert `node` at an already-normalized `path`, creating missing parents.
  fn insert(&mut self, path: String, node: TreeNode) -> Result<(), StoreError> {
    let components: Vec<&str> = path.split('/').collect();
    let mut parent = String::new();
    for component in &components[..components.len() - 1] {
      parent = join(&parent, component);
      match self.nodes.get(&parent) {
        Some(TreeNode::Dir { .. }) => {}
        Some(_) => {
          return Err(StoreError::NotADirectory {
            path: path.clone(),
            parent,
          });
        }
        None => {
          self.nodes.insert(parent.clone(), TreeNode::Dir { mode: IMPLICIT_DIR_MODE });
        }
      }
    }

    match (self.nodes.get(&path), &node) {
      (Some(TreeNode::Dir { .. }), TreeNode::Dir { .. }) | (None, _) => {}
      (Some(TreeNode::Dir { .. }), _) | (Some(_), TreeNode::Dir { .. }) => {
        return Err(StoreError::AlreadyExists(path));
      }
      // Overwriting a file or symlink replaces it.
      (Some(_), _) => {}
    }

    trace!(path = %path, "store insert");
    self.nodes.insert(path, node);
    Ok(())
  }
}

/// The in-memory filesystem and object store for a single repository.
#[derive(Debug, Clone)]
pub struct RepositoryStore {
  url: String,
  reference: String,
  commit: Option<String>,
  tree: MemTree,
  objects: ObjectStore,
}

impl RepositoryStore {
  /// Create an empty store for `url` at `reference`.
  pub fn new(url: impl Into<String>, reference: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      reference: reference.into(),
      commit: None,
      tree: MemTree::default(),
      objects: ObjectStore::default(),
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn reference(&self) -> &str {
    &self.reference
  }

  /// The commit the tree was checked out from, once known.
  pub fn commit(&self) -> Option<&str> {
    self.commit.as_deref()
  }

  pub fn set_commit(&mut self, commit: impl Into<String>) {
    self.commit = Some(commit.into());
  }

  pub fn tree(&self) -> &MemTree {
    &self.tree
  }

  pub fn objects(&self) -> &ObjectStore {
    &self.objects
  }

  /// Create a directory (and any missing parents).
  pub fn create_dir(&mut self, path: &str, mode: u32) -> Result<(), StoreError> {
    let path = normalize(path)?;
    self.tree.insert(path, TreeNode::Dir { mode: mode & 0o7777 })
  }

  /// Write a regular file, creating missing parent directories.
  pub fn write_file(&mut self, path: &str, mode: u32, content: Vec<u8>) -> Result<(), StoreError> {
    let path = normalize(path)?;
    let size = content.len() as u64;
    let object = self.objects.put(content);
    self.tree.insert(
      path,
      TreeNode::File {
        mode: mode & 0o7777,
        object,
        size,
      },
    )
  }

  /// Create a symbolic link pointing at `target`.
  pub fn symlink(&mut self, path: &str, target: impl Into<String>) -> Result<(), StoreError> {
    let path = normalize(path)?;
    self.tree.insert(path, TreeNode::Symlink { target: target.into() })
  }

  /// Read a regular file's content.
  pub fn read(&self, path: &str) -> Result<&[u8], StoreError> {
    let path = normalize(path)?;
    match self.tree.get(&path) {
      Some(TreeNode::File { object, .. }) => self.objects.get(object).ok_or_else(|| StoreError::MissingObject {
        path: path.clone(),
        object: object.clone(),
      }),
      _ => Err(StoreError::NotFound(path)),
    }
  }

  /// Every entry in pre-order depth-first order: each directory precedes its
  /// children, and siblings are sorted by name.
  pub fn walk(&self) -> Vec<StoreEntry> {
    let mut entries = Vec::with_capacity(self.tree.len());
    self.walk_into("", &mut entries);
    entries
  }

  fn walk_into(&self, dir: &str, entries: &mut Vec<StoreEntry>) {
    for (name, node) in self.tree.children(dir) {
      let path = join(dir, name);
      entries.push(StoreEntry {
        path: path.clone(),
        node: node.clone(),
      });
      if node.is_dir() {
        self.walk_into(&path, entries);
      }
    }
  }

  /// Number of regular files in the tree.
  pub fn file_count(&self) -> usize {
    self
      .tree
      .nodes
      .values()
      .filter(|n| matches!(n, TreeNode::File { .. }))
      .count()
  }
}

fn normalize(path: &str) -> Result<String, StoreError> {
  normalize_relative(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))
}

/// Paths given to the [`LocalFs`] view are resolved relative to the store
/// root; a leading `/` is ignored.
fn fs_path(path: &Path) -> io::Result<String> {
  let raw = path.to_string_lossy();
  let trimmed = raw.trim_start_matches('/');
  if trimmed.is_empty() || trimmed == "." {
    return Ok(String::new());
  }
  normalize_relative(trimmed).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid path '{}'", raw)))
}

fn not_found(path: &Path) -> io::Error {
  io::Error::new(io::ErrorKind::NotFound, format!("'{}' not found", path.display()))
}

/// A store doubles as a local filesystem, so context assembly can read "local"
/// files from memory.
impl LocalFs for RepositoryStore {
  fn metadata(&self, path: &Path) -> io::Result<LocalMetadata> {
    let key = fs_path(path)?;
    if key.is_empty() {
      return Ok(LocalMetadata {
        kind: EntryKind::Dir,
        mode: IMPLICIT_DIR_MODE,
        len: 0,
      });
    }
    match self.tree.get(&key) {
      Some(TreeNode::Dir { mode }) => Ok(LocalMetadata {
        kind: EntryKind::Dir,
        mode: *mode,
        len: 0,
      }),
      Some(TreeNode::File { mode, size, .. }) => Ok(LocalMetadata {
        kind: EntryKind::File,
        mode: *mode,
        len: *size,
      }),
      Some(TreeNode::Symlink { .. }) => Ok(LocalMetadata {
        kind: EntryKind::Other,
        mode: 0o777,
        len: 0,
      }),
      None => Err(not_found(path)),
    }
  }

  fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
    let key = fs_path(path)?;
    if !key.is_empty() && !matches!(self.tree.get(&key), Some(TreeNode::Dir { .. })) {
      return Err(not_found(path));
    }
    Ok(self.tree.children(&key).into_iter().map(|(name, _)| path.join(name)).collect())
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    let key = fs_path(path)?;
    RepositoryStore::read(self, &key)
      .map(<[u8]>::to_vec)
      .map_err(|_| not_found(path))
  }
}
