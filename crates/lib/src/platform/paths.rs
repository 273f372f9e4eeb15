use std::path::PathBuf;

/// Returns the user's home directory, or `None` if it cannot be determined.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
}

/// Returns the user's home directory, or `None` if it cannot be determined.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Whether a declared path needs home directory expansion.
pub fn is_home_relative(path: &str) -> bool {
  path.starts_with("~/")
}

/// Expand a leading `~/` against `home`.
///
/// Paths without the prefix are returned unchanged. Returns `None` when the
/// path is home-relative but no home directory is available.
pub fn expand_home(path: &str, home: Option<&PathBuf>) -> Option<PathBuf> {
  match path.strip_prefix("~/") {
    Some(rest) => home.map(|h| h.join(rest)),
    None => Some(PathBuf::from(path)),
  }
}
