use serde::Serialize;

use super::store::RepositoryStore;

/// Derive the context folder name for a repository URL.
///
/// Takes the last path segment (after `/` or `:`), strips a trailing `/`,
/// lower-cases it, then drops a `.git` suffix. `https://host/Owner/Repo.git`,
/// `http://host/owner/repo` and `git@host:Owner/repo.git` all map to `repo`.
/// Applying it to its own output returns the output unchanged.
pub fn folder_from_url(url: &str) -> String {
  let trimmed = url.trim().trim_end_matches('/');
  let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
  let name = last.to_lowercase();
  match name.strip_suffix(".git") {
    Some(stem) => stem.to_string(),
    None => name,
  }
}

/// Pick the ref to fetch: a non-empty override replaces every declared ref.
pub fn effective_ref<'a>(declared: &'a str, override_ref: Option<&'a str>) -> &'a str {
  match override_ref {
    Some(r) if !r.is_empty() => r,
    _ => declared,
  }
}

/// Summary of one fetched repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedRepository {
  pub url: String,
  pub reference: String,
  pub folder: String,
  pub commit: Option<String>,
  pub files: usize,
}

impl From<&RepositoryStore> for FetchedRepository {
  fn from(store: &RepositoryStore) -> Self {
    Self {
      url: store.url().to_string(),
      reference: store.reference().to_string(),
      folder: folder_from_url(store.url()),
      commit: store.commit().map(str::to_string),
      files: store.file_count(),
    }
  }
}
