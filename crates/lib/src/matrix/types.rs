use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The decoded build matrix: what to fold into the build context.
///
/// Both fields default to empty, which yields a context containing only the
/// build file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSpec {
  /// Local files or directories, in inclusion order.
  pub files: Vec<String>,
  /// Repository URL -> branch or tag.
  pub git: BTreeMap<String, String>,
}

impl BuildSpec {
  /// Whether the spec declares nothing beyond the build file.
  pub fn is_empty(&self) -> bool {
    self.files.is_empty() && self.git.is_empty()
  }
}

/// A parsed input file: the build matrix plus the build instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixFile {
  pub spec: BuildSpec,
  /// Build instructions with the front matter removed, newline-terminated.
  pub build_file: Vec<u8>,
}
