//! Test doubles for frontbuild-lib.
//!
//! [`FakeCloner`] and [`FakeDaemon`] stand in for git and the build daemon so
//! the fetch manager, the coordinator, and the builder can be exercised
//! without network access or a running daemon.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{self, Read};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tar::EntryType;

use crate::daemon::docker::split_reference;
use crate::daemon::{BuildDaemon, BuildRequest, DaemonError, ImageFilter, ImageSummary, ProgressSource};
use crate::inputs::{CloneError, GitCloner, RepositoryStore};

/// Decode a tar stream into `(path, kind, content)` triples.
pub fn read_entries(bytes: &[u8]) -> Vec<(String, EntryType, Vec<u8>)> {
  let mut archive = tar::Archive::new(bytes);
  archive
    .entries()
    .unwrap()
    .map(|entry| {
      let mut entry = entry.unwrap();
      let path = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
      let kind = entry.header().entry_type();
      let mut content = Vec::new();
      entry.read_to_end(&mut content).unwrap();
      (path, kind, content)
    })
    .collect()
}

/// Paths of a tar stream, in order.
pub fn entry_paths(bytes: &[u8]) -> Vec<String> {
  read_entries(bytes).into_iter().map(|(path, _, _)| path).collect()
}

/// Scripted [`GitCloner`].
#[derive(Default)]
pub struct FakeCloner {
  files: HashMap<String, Vec<(String, String)>>,
  failing: HashSet<String>,
  slow: HashMap<String, Duration>,
  stalled: HashMap<String, Duration>,
  calls: Mutex<Vec<(String, String)>>,
}

impl FakeCloner {
  /// Add a file to the tree served for `url`.
  pub fn with_file(mut self, url: &str, path: &str, content: &str) -> Self {
    self
      .files
      .entry(url.to_string())
      .or_default()
      .push((path.to_string(), content.to_string()));
    self
  }

  /// Make clones of `url` fail.
  pub fn failing(mut self, url: &str) -> Self {
    self.failing.insert(url.to_string());
    self
  }

  /// Make clones of `url` take `delay`, stopping early when interrupted.
  pub fn slow(mut self, url: &str, delay: Duration) -> Self {
    self.slow.insert(url.to_string(), delay);
    self
  }

  /// Make clones of `url` block for `delay` without checking the interrupt.
  pub fn stalled(mut self, url: &str, delay: Duration) -> Self {
    self.stalled.insert(url.to_string(), delay);
    self
  }

  /// Every `(url, ref)` clone requested so far.
  pub fn calls(&self) -> Vec<(String, String)> {
    self.calls.lock().unwrap().clone()
  }
}

impl GitCloner for FakeCloner {
  fn fetch_into(
    &self,
    url: &str,
    reference: &str,
    store: &mut RepositoryStore,
    interrupt: &AtomicBool,
  ) -> Result<(), CloneError> {
    self.calls.lock().unwrap().push((url.to_string(), reference.to_string()));

    if let Some(delay) = self.slow.get(url) {
      let deadline = Instant::now() + *delay;
      while Instant::now() < deadline {
        if interrupt.load(Ordering::Relaxed) {
          return Err(CloneError::Interrupted);
        }
        std::thread::sleep(Duration::from_millis(5));
      }
    }

    if let Some(delay) = self.stalled.get(url) {
      std::thread::sleep(*delay);
    }

    if self.failing.contains(url) {
      return Err(CloneError::Fetch {
        url: url.to_string(),
        source: "remote unreachable".into(),
      });
    }

    for (path, content) in self.files.get(url).into_iter().flatten() {
      store.write_file(path, 0o644, content.as_bytes().to_vec())?;
    }
    let commit = format!("{:0>40}", store.file_count());
    store.set_commit(commit);
    Ok(())
  }
}

/// One daemon call recorded by [`FakeDaemon`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
  Submit {
    labels: BTreeMap<String, String>,
    remove_intermediate: bool,
  },
  List(ImageFilter),
  Tag { id: String, reference: String },
  Remove { id: String, force: bool, prune_children: bool },
}

/// An image held by [`FakeDaemon`]. It is dangling when it has no tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeImage {
  pub id: String,
  pub labels: BTreeMap<String, String>,
  pub repo_tags: Vec<String>,
  pub created: i64,
}

#[derive(Default)]
struct FakeDaemonState {
  images: Vec<FakeImage>,
  calls: Vec<DaemonCall>,
  contexts: Vec<Bytes>,
  next_id: usize,
}

/// In-memory [`BuildDaemon`] with Docker's tag semantics: tagging an image
/// moves the tag away from whichever image held it before.
#[derive(Default)]
pub struct FakeDaemon {
  state: Mutex<FakeDaemonState>,
  progress: Vec<Bytes>,
  unavailable: bool,
  reject_build: Option<String>,
  break_stream: bool,
  fail_tag: bool,
  fail_remove: bool,
}

impl FakeDaemon {
  /// Seed an existing image. Images are created in call order.
  pub fn with_image(self, id: &str, labels: &[(&str, &str)], repo_tags: &[&str]) -> Self {
    {
      let mut state = self.state.lock().unwrap();
      state.next_id += 1;
      let created = state.next_id as i64;
      state.images.push(FakeImage {
        id: id.to_string(),
        labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        repo_tags: repo_tags.iter().map(|t| t.to_string()).collect(),
        created,
      });
    }
    self
  }

  /// Add a raw chunk to the progress stream of every build.
  pub fn with_progress(mut self, chunk: &str) -> Self {
    self.progress.push(Bytes::from(chunk.to_string()));
    self
  }

  /// Refuse every connection.
  pub fn unavailable(mut self) -> Self {
    self.unavailable = true;
    self
  }

  /// Reject build submissions with `message`.
  pub fn rejecting(mut self, message: &str) -> Self {
    self.reject_build = Some(message.to_string());
    self
  }

  /// Drop the connection after the scripted progress.
  pub fn breaking_stream(mut self) -> Self {
    self.break_stream = true;
    self
  }

  pub fn failing_tag(mut self) -> Self {
    self.fail_tag = true;
    self
  }

  pub fn failing_remove(mut self) -> Self {
    self.fail_remove = true;
    self
  }

  pub fn calls(&self) -> Vec<DaemonCall> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn images(&self) -> Vec<FakeImage> {
    self.state.lock().unwrap().images.clone()
  }

  /// Context archives received, in submission order.
  pub fn contexts(&self) -> Vec<Bytes> {
    self.state.lock().unwrap().contexts.clone()
  }

  fn status(path: &str, status: u16, message: &str) -> DaemonError {
    DaemonError::Status {
      path: path.to_string(),
      status,
      message: message.to_string(),
    }
  }
}

/// Progress stream served by [`FakeDaemon`].
pub struct ScriptedProgress {
  chunks: VecDeque<Bytes>,
  break_at_end: bool,
}

impl ProgressSource for ScriptedProgress {
  async fn next_chunk(&mut self) -> Result<Option<Bytes>, DaemonError> {
    match self.chunks.pop_front() {
      Some(chunk) => Ok(Some(chunk)),
      None if self.break_at_end => Err(DaemonError::Connect {
        endpoint: "fake".to_string(),
        source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
      }),
      None => Ok(None),
    }
  }
}

impl BuildDaemon for FakeDaemon {
  type Progress = ScriptedProgress;

  async fn submit_build(&self, request: BuildRequest) -> Result<ScriptedProgress, DaemonError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(DaemonCall::Submit {
      labels: request.labels.clone(),
      remove_intermediate: request.remove_intermediate,
    });

    if self.unavailable {
      return Err(DaemonError::Connect {
        endpoint: "fake".to_string(),
        source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
      });
    }
    if let Some(message) = &self.reject_build {
      return Err(Self::status("/build", 500, message));
    }

    state.contexts.push(request.context);
    state.next_id += 1;
    let id = format!("sha256:built{}", state.next_id);
    let created = state.next_id as i64;
    state.images.push(FakeImage {
      id,
      labels: request.labels,
      repo_tags: Vec::new(),
      created,
    });

    Ok(ScriptedProgress {
      chunks: self.progress.iter().cloned().collect(),
      break_at_end: self.break_stream,
    })
  }

  async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, DaemonError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(DaemonCall::List(filter.clone()));
    // Newest first, like the Docker API.
    Ok(
      state
        .images
        .iter()
        .rev()
        .filter(|image| filter.matches(&image.labels, image.repo_tags.is_empty()))
        .map(|image| ImageSummary {
          id: image.id.clone(),
          labels: image.labels.clone(),
          repo_tags: image.repo_tags.clone(),
          created: image.created,
        })
        .collect(),
    )
  }

  async fn tag_image(&self, id: &str, reference: &str) -> Result<(), DaemonError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(DaemonCall::Tag {
      id: id.to_string(),
      reference: reference.to_string(),
    });
    if self.fail_tag {
      return Err(Self::status("/images/tag", 500, "tagging disabled"));
    }

    let (repo, tag) = split_reference(reference)?;
    let full = format!("{}:{}", repo, tag.unwrap_or("latest"));
    if !state.images.iter().any(|image| image.id == id) {
      return Err(Self::status("/images/tag", 404, "no such image"));
    }
    for image in &mut state.images {
      image.repo_tags.retain(|t| *t != full);
      if image.id == id {
        image.repo_tags.push(full.clone());
      }
    }
    Ok(())
  }

  async fn remove_image(&self, id: &str, force: bool, prune_children: bool) -> Result<(), DaemonError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(DaemonCall::Remove {
      id: id.to_string(),
      force,
      prune_children,
    });
    if self.fail_remove {
      return Err(Self::status("/images", 409, "image is in use"));
    }

    let before = state.images.len();
    state.images.retain(|image| image.id != id);
    if state.images.len() == before {
      return Err(Self::status("/images", 404, "no such image"));
    }
    Ok(())
  }
}
