//! Archive-relative path handling.

/// Normalize a relative path into `/`-separated archive form.
///
/// Empty and `.` components are dropped and backslashes are treated as
/// separators. Returns `None` for absolute paths, paths containing `..`, and
/// paths that normalize to nothing, since none of those can be placed safely
/// under an archive root.
pub fn normalize_relative(path: &str) -> Option<String> {
  let unified = path.replace('\\', "/");
  if unified.starts_with('/') {
    return None;
  }

  let mut parts = Vec::new();
  for component in unified.split('/') {
    match component {
      "" | "." => continue,
      ".." => return None,
      part => parts.push(part),
    }
  }

  if parts.is_empty() {
    return None;
  }
  Some(parts.join("/"))
}

/// Join two archive-relative paths, either of which may be empty.
pub fn join(base: &str, name: &str) -> String {
  match (base.is_empty(), name.is_empty()) {
    (true, _) => name.to_string(),
    (_, true) => base.to_string(),
    _ => format!("{}/{}", base, name),
  }
}
