//! Concurrent repository acquisition.
//!
//! [`FetchManager::fetch_all`] starts one task per declared repository and
//! waits for every task to settle. Each task receives its store by move and
//! hands it back through its join handle, so no store is ever shared between
//! tasks. The first failure raises a shared interrupt flag that makes the
//! remaining clones stop early; it is then reported with the repository and
//! ref that caused it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::fetch::{CloneError, GitCloner};
use super::store::RepositoryStore;
use super::types::effective_ref;

/// A repository could not be fetched.
#[derive(Debug, Error)]
#[error("failed to fetch repository '{url}' at '{reference}': {source}")]
pub struct FetchError {
  pub url: String,
  pub reference: String,
  #[source]
  pub source: CloneError,
}

type TaskOutput = (String, String, Result<RepositoryStore, CloneError>);

/// Drives one concurrent fetch per declared repository.
pub struct FetchManager<C> {
  cloner: Arc<C>,
  timeout: Option<Duration>,
}

impl<C: GitCloner> FetchManager<C> {
  pub fn new(cloner: Arc<C>) -> Self {
    Self { cloner, timeout: None }
  }

  /// Fail any single fetch that runs longer than `timeout`.
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  /// Fetch every repository in `repositories` (URL -> ref) concurrently.
  ///
  /// A non-empty `ref_override` replaces every declared ref. Returns the
  /// populated stores ordered by URL, or the first failure once all tasks
  /// have settled.
  pub async fn fetch_all(
    &self,
    repositories: &BTreeMap<String, String>,
    ref_override: Option<&str>,
  ) -> Result<Vec<RepositoryStore>, FetchError> {
    if repositories.is_empty() {
      debug!("no repositories declared");
      return Ok(Vec::new());
    }

    info!(count = repositories.len(), "fetching repositories");

    let interrupt = Arc::new(AtomicBool::new(false));
    let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
    let mut launched = HashMap::new();

    for (url, declared) in repositories {
      let reference = effective_ref(declared, ref_override).to_string();
      let store = RepositoryStore::new(url.clone(), reference.clone());

      let handle = join_set.spawn(fetch_one(
        self.cloner.clone(),
        url.clone(),
        reference.clone(),
        store,
        interrupt.clone(),
        self.timeout,
      ));
      launched.insert(handle.id(), (url.clone(), reference));
    }

    let mut stores = Vec::with_capacity(repositories.len());
    let mut first_failure: Option<FetchError> = None;

    while let Some(joined) = join_set.join_next_with_id().await {
      let (url, reference, outcome) = match joined {
        Ok((_, output)) => output,
        Err(e) => {
          let (url, reference) = launched.remove(&e.id()).unwrap_or_default();
          (url, reference, Err(CloneError::Task(e.to_string())))
        }
      };

      match outcome {
        Ok(store) => {
          info!(url = %url, reference = %reference, files = store.file_count(), "repository fetched");
          stores.push(store);
        }
        Err(CloneError::Interrupted) => {
          warn!(url = %url, reference = %reference, "fetch interrupted");
        }
        Err(source) => {
          error!(url = %url, reference = %reference, error = %source, "fetch failed");
          interrupt.store(true, Ordering::Relaxed);
          if first_failure.is_none() {
            first_failure = Some(FetchError { url, reference, source });
          }
        }
      }
    }

    if let Some(failure) = first_failure {
      return Err(failure);
    }

    stores.sort_by(|a, b| a.url().cmp(b.url()));
    Ok(stores)
  }
}

/// Run one blocking clone, bounded by `timeout` when set.
async fn fetch_one<C: GitCloner>(
  cloner: Arc<C>,
  url: String,
  reference: String,
  mut store: RepositoryStore,
  interrupt: Arc<AtomicBool>,
  timeout: Option<Duration>,
) -> TaskOutput {
  let (task_url, task_reference, task_interrupt) = (url.clone(), reference.clone(), interrupt.clone());
  let mut handle = tokio::task::spawn_blocking(move || {
    cloner
      .fetch_into(&task_url, &task_reference, &mut store, &task_interrupt)
      .map(|()| store)
  });

  let joined = match timeout {
    Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
      Ok(joined) => joined,
      Err(_) => {
        // The blocking clone is detached; it stops at its next interrupt check.
        interrupt.store(true, Ordering::Relaxed);
        return (url, reference, Err(CloneError::TimedOut(limit)));
      }
    },
    None => handle.await,
  };

  let outcome = joined.unwrap_or_else(|e| Err(CloneError::Task(e.to_string())));
  (url, reference, outcome)
}
