use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{BuildContext, ContextError};
use crate::consts::BUILD_FILE_NAME;
use crate::inputs::{RepositoryStore, StoreError, TreeNode, folder_from_url};
use crate::platform::paths::{expand_home, home_dir, is_home_relative};
use crate::platform::{EntryKind, LocalFs};
use crate::util::path::join;

/// Mode of the synthesized build file.
const BUILD_FILE_MODE: u32 = 0o644;

/// Mode of the directory entry that roots each repository.
const REPOSITORY_DIR_MODE: u32 = 0o755;

/// Assign each store its context folder, ordered by folder name.
///
/// Fails if a folder is not a single safe path component, or if two different
/// URLs map to the same folder.
pub fn folder_layout(stores: &[RepositoryStore]) -> Result<BTreeMap<String, &RepositoryStore>, ContextError> {
  let mut layout: BTreeMap<String, &RepositoryStore> = BTreeMap::new();

  for store in stores {
    let folder = folder_from_url(store.url());
    if folder.is_empty() || folder == "." || folder == ".." || folder.contains(['/', '\\']) {
      return Err(ContextError::UnsafePath(folder));
    }
    if let Some(existing) = layout.get(&folder) {
      return Err(ContextError::NameCollision {
        folder,
        first: existing.url().to_string(),
        second: store.url().to_string(),
      });
    }
    layout.insert(folder, store);
  }

  Ok(layout)
}

/// Builds a sealed [`BuildContext`] from the build file, local paths, and
/// fetched repositories.
pub struct ContextAssembler<'a> {
  fs: &'a dyn LocalFs,
  home: Option<PathBuf>,
}

impl<'a> ContextAssembler<'a> {
  /// Create an assembler reading local files through `fs`, resolving `~/`
  /// against the current user's home directory.
  pub fn new(fs: &'a dyn LocalFs) -> Self {
    Self { fs, home: home_dir() }
  }

  /// Override the home directory used for `~/` paths.
  pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
    self.home = home;
    self
  }

  /// Assemble and seal the context.
  pub fn assemble(
    &self,
    build_file: &[u8],
    files: &[String],
    stores: &[RepositoryStore],
  ) -> Result<BuildContext, ContextError> {
    info!(
      files = files.len(),
      repositories = stores.len(),
      "building context"
    );

    let layout = folder_layout(stores)?;
    let mut ctx = BuildContext::new();

    ctx.append_file(BUILD_FILE_NAME, BUILD_FILE_MODE, build_file)?;

    for declared in files {
      self.add_local(&mut ctx, declared)?;
    }

    for (folder, store) in &layout {
      add_repository(&mut ctx, folder, store)?;
    }

    ctx.seal()?;
    debug!(entries = ctx.len(), "context sealed");
    Ok(ctx)
  }

  fn add_local(&self, ctx: &mut BuildContext, declared: &str) -> Result<(), ContextError> {
    let path = expand_home(declared, self.home.as_ref()).ok_or_else(|| ContextError::UserResolution {
      path: declared.to_string(),
    })?;
    if is_home_relative(declared) {
      debug!(declared, resolved = %path.display(), "expanded home path");
    }

    let meta = self.fs.metadata(&path).map_err(|e| access_error(&path, e))?;
    match meta.kind {
      EntryKind::File => {
        let name = base_name(&path)?;
        let content = self.fs.read(&path).map_err(|e| access_error(&path, e))?;
        ctx.append_file(&name, meta.mode, &content)
      }
      EntryKind::Dir => {
        let dir_name = base_name(&path)?;
        ctx.append_dir(&dir_name, meta.mode)?;
        self.add_directory_children(ctx, &path, &dir_name)
      }
      EntryKind::Other => Err(access_error(
        &path,
        io::Error::new(io::ErrorKind::InvalidInput, "not a regular file or directory"),
      )),
    }
  }

  /// Add the immediate regular-file children of `dir` under `dir_name`.
  /// Subdirectories are not descended into.
  fn add_directory_children(&self, ctx: &mut BuildContext, dir: &Path, dir_name: &str) -> Result<(), ContextError> {
    let children = self.fs.read_dir(dir).map_err(|e| access_error(dir, e))?;

    for child in children {
      let meta = self.fs.metadata(&child).map_err(|e| access_error(&child, e))?;
      if meta.kind != EntryKind::File {
        warn!(path = %child.display(), "skipping non-file entry in included directory");
        continue;
      }
      let content = self.fs.read(&child).map_err(|e| access_error(&child, e))?;
      ctx.append_file(&join(dir_name, &base_name(&child)?), meta.mode, &content)?;
    }

    Ok(())
  }
}

fn add_repository(ctx: &mut BuildContext, folder: &str, store: &RepositoryStore) -> Result<(), ContextError> {
  debug!(url = store.url(), folder, "adding repository tree");
  ctx.append_dir(folder, REPOSITORY_DIR_MODE)?;

  for entry in store.walk() {
    let path = join(folder, &entry.path);
    match &entry.node {
      TreeNode::Dir { mode } => ctx.append_dir(&path, *mode)?,
      TreeNode::File { mode, object, .. } => {
        let content = store.objects().get(object).ok_or_else(|| StoreError::MissingObject {
          path: entry.path.clone(),
          object: object.clone(),
        })?;
        ctx.append_file(&path, *mode, content)?;
      }
      TreeNode::Symlink { target } => ctx.append_symlink(&path, target)?,
    }
  }

  Ok(())
}

fn access_error(path: &Path, source: io::Error) -> ContextError {
  ContextError::FileAccess {
    path: path.to_path_buf(),
    source,
  }
}

fn base_name(path: &Path) -> Result<String, ContextError> {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .ok_or_else(|| ContextError::UnsafePath(path.display().to_string()))
}
