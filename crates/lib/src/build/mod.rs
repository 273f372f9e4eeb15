//! Build orchestration.
//!
//! A [`Builder`] runs one build end to end:
//!
//! 1. Fetch every declared repository concurrently ([`crate::inputs`])
//! 2. Assemble and seal the build context ([`crate::context`])
//! 3. Submit, promote, and clean up against the daemon ([`coordinator`])
//!
//! The stages never overlap, and the first failure ends the run tagged with
//! the stage that produced it.
//!
//! # Submodules
//!
//! - [`coordinator`] - The build/tag/cleanup protocol
//! - [`types`] - Run options and the summary report

pub mod coordinator;
mod types;

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::context::{ContextAssembler, ContextError};
use crate::daemon::BuildDaemon;
use crate::inputs::{FetchError, FetchManager, FetchedRepository, GitCloner};
use crate::matrix::BuildSpec;
use crate::platform::LocalFs;
use crate::platform::paths::home_dir;

pub use coordinator::{BuildOutcome, Coordinator, CoordinatorError};
pub use types::*;

/// Pipeline stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Fetch,
  Context,
  Build,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Fetch => "fetch",
      Stage::Context => "context",
      Stage::Build => "build",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errors that can end a build run.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("fetch stage failed")]
  Fetch(#[from] FetchError),

  #[error("context stage failed")]
  Context(#[from] ContextError),

  #[error("build stage failed")]
  Build(#[from] CoordinatorError),
}

impl BuildError {
  pub fn stage(&self) -> Stage {
    match self {
      BuildError::Fetch(_) => Stage::Fetch,
      BuildError::Context(_) => Stage::Context,
      BuildError::Build(_) => Stage::Build,
    }
  }
}

/// Runs builds with injected git, daemon, and filesystem collaborators.
pub struct Builder<C, D> {
  fetcher: FetchManager<C>,
  daemon: D,
  fs: Arc<dyn LocalFs>,
  home: Option<PathBuf>,
  remove_intermediate: bool,
}

impl<C: GitCloner, D: BuildDaemon> Builder<C, D> {
  pub fn new(cloner: Arc<C>, daemon: D, fs: Arc<dyn LocalFs>, options: &BuildOptions) -> Self {
    Self {
      fetcher: FetchManager::new(cloner).with_timeout(options.fetch_timeout),
      daemon,
      fs,
      home: home_dir(),
      remove_intermediate: options.remove_intermediate,
    }
  }

  /// Override the home directory used for `~/` paths.
  pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
    self.home = home;
    self
  }

  pub fn daemon(&self) -> &D {
    &self.daemon
  }

  /// Build `build_file` with the inputs declared in `spec`.
  ///
  /// `ref_override`, when non-empty, replaces every declared ref. Daemon
  /// progress is written to `sink`.
  pub async fn run(
    &self,
    spec: &BuildSpec,
    build_file: &[u8],
    tag: &str,
    ref_override: Option<&str>,
    sink: &mut dyn Write,
  ) -> Result<BuildSummary, BuildError> {
    info!(stage = %Stage::Fetch, repositories = spec.git.len(), "starting stage");
    let stores = self.fetcher.fetch_all(&spec.git, ref_override).await?;
    let repositories: Vec<FetchedRepository> = stores.iter().map(FetchedRepository::from).collect();

    info!(stage = %Stage::Context, files = spec.files.len(), "starting stage");
    let context = ContextAssembler::new(self.fs.as_ref())
      .with_home(self.home.clone())
      .assemble(build_file, &spec.files, &stores)?;
    drop(stores);

    let context_entries = context.len();
    let context = Bytes::from(context.into_bytes()?);
    let context_bytes = context.len() as u64;

    info!(stage = %Stage::Build, tag, "starting stage");
    let outcome = Coordinator::new(&self.daemon)
      .remove_intermediate(self.remove_intermediate)
      .run(context, tag, sink)
      .await?;

    Ok(BuildSummary {
      tag: tag.to_string(),
      repositories,
      context_entries,
      context_bytes,
      image_id: outcome.image_id,
      promoted: outcome.promoted,
      removed: outcome.removed,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::HostFs;
  use crate::util::testutil::{DaemonCall, FakeCloner, FakeDaemon, entry_paths};
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  fn builder(cloner: FakeCloner, daemon: FakeDaemon) -> Builder<FakeCloner, FakeDaemon> {
    Builder::new(Arc::new(cloner), daemon, Arc::new(HostFs), &BuildOptions::default()).with_home(None)
  }

  fn spec(files: &[String], git: &[(&str, &str)]) -> BuildSpec {
    BuildSpec {
      files: files.to_vec(),
      git: git
        .iter()
        .map(|(u, r)| (u.to_string(), r.to_string()))
        .collect::<BTreeMap<_, _>>(),
    }
  }

  #[tokio::test]
  async fn single_local_file_yields_two_entries() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("settings.ini");
    std::fs::write(&file, "[app]").unwrap();

    let cloner = FakeCloner::default();
    let b = builder(cloner, FakeDaemon::default());
    let summary = b
      .run(
        &spec(&[file.display().to_string()], &[]),
        b"FROM scratch\n",
        "app:1",
        None,
        &mut Vec::new(),
      )
      .await
      .unwrap();

    assert_eq!(summary.context_entries, 2);
    assert!(summary.repositories.is_empty());
    let contexts = b.daemon().contexts();
    assert_eq!(entry_paths(&contexts[0]), vec!["Dockerfile", "settings.ini"]);
  }

  #[tokio::test]
  async fn repository_lands_under_its_folder() {
    let cloner = FakeCloner::default().with_file("https://host/org/Repo.git", "src/main.rs", "fn main() {}");
    let b = builder(cloner, FakeDaemon::default());
    let summary = b
      .run(
        &spec(&[], &[("https://host/org/Repo.git", "main")]),
        b"FROM scratch\nCOPY repo /src\n",
        "app:1",
        None,
        &mut Vec::new(),
      )
      .await
      .unwrap();

    assert_eq!(summary.repositories.len(), 1);
    assert_eq!(summary.repositories[0].folder, "repo");
    assert_eq!(summary.repositories[0].reference, "main");
    let contexts = b.daemon().contexts();
    assert_eq!(
      entry_paths(&contexts[0]),
      vec!["Dockerfile", "repo", "repo/src", "repo/src/main.rs"]
    );
  }

  #[tokio::test]
  async fn branch_override_reaches_every_clone() {
    let cloner = Arc::new(FakeCloner::default());
    let b = Builder::new(cloner.clone(), FakeDaemon::default(), Arc::new(HostFs), &BuildOptions::default());
    b.run(
      &spec(&[], &[("https://h/a.git", "main"), ("https://h/b.git", "v2")]),
      b"FROM scratch\n",
      "app:1",
      Some("hotfix"),
      &mut Vec::new(),
    )
    .await
    .unwrap();

    assert!(cloner.calls().iter().all(|(_, r)| r == "hotfix"));
  }

  #[tokio::test]
  async fn missing_local_file_never_reaches_the_daemon() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope.conf");

    let b = builder(FakeCloner::default(), FakeDaemon::default());
    let err = b
      .run(
        &spec(&[missing.display().to_string()], &[]),
        b"FROM scratch\n",
        "app:1",
        None,
        &mut Vec::new(),
      )
      .await
      .unwrap_err();

    assert_eq!(err.stage(), Stage::Context);
    match err {
      BuildError::Context(ContextError::FileAccess { path, .. }) => assert_eq!(path, missing),
      other => panic!("unexpected error: {other:?}"),
    }
    assert!(b.daemon().calls().is_empty());
  }

  #[tokio::test]
  async fn fetch_failure_stops_the_pipeline() {
    let b = builder(FakeCloner::default().failing("https://h/x.git"), FakeDaemon::default());
    let err = b
      .run(
        &spec(&[], &[("https://h/x.git", "main")]),
        b"FROM scratch\n",
        "app:1",
        None,
        &mut Vec::new(),
      )
      .await
      .unwrap_err();

    assert_eq!(err.stage(), Stage::Fetch);
    assert!(b.daemon().calls().is_empty());
  }

  #[tokio::test]
  async fn daemon_failure_is_the_build_stage() {
    let b = builder(FakeCloner::default(), FakeDaemon::default().unavailable());
    let err = b
      .run(&spec(&[], &[]), b"FROM scratch\n", "app:1", None, &mut Vec::new())
      .await
      .unwrap_err();

    assert_eq!(err.stage(), Stage::Build);
    assert!(matches!(
      err,
      BuildError::Build(CoordinatorError::DaemonUnavailable(_))
    ));
    assert!(matches!(b.daemon().calls()[0], DaemonCall::Submit { .. }));
  }

  #[tokio::test]
  async fn progress_is_relayed_to_the_sink() {
    let daemon = FakeDaemon::default()
      .with_progress(r#"{"stream":"Step 1/1 : FROM scratch\n"}"#)
      .with_progress(r#"{"aux":{"ID":"sha256:feed"}}"#);
    let b = builder(FakeCloner::default(), daemon);
    let mut sink = Vec::new();
    let summary = b
      .run(&spec(&[], &[]), b"FROM scratch\n", "app:1", None, &mut sink)
      .await
      .unwrap();

    assert_eq!(String::from_utf8(sink).unwrap(), "Step 1/1 : FROM scratch\n");
    assert_eq!(summary.image_id.as_deref(), Some("sha256:feed"));
    assert_eq!(summary.promoted.len(), 1);
  }
}
