//! Container build daemon interface.
//!
//! [`BuildDaemon`] is the seam between the build coordinator and the daemon:
//! the coordinator only ever submits a context, reads progress, lists, tags,
//! and removes images. [`DockerClient`] implements it over the Docker Engine
//! HTTP API.

pub mod docker;
pub mod message;

use std::collections::BTreeMap;
use std::io;

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

pub use docker::{DockerClient, DockerHost};
pub use message::{JsonMessage, MessageDecoder, StreamError, render_message};

/// Errors that can occur while talking to the build daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
  /// The configured host is not a supported endpoint.
  #[error("invalid daemon host '{0}'")]
  InvalidHost(String),

  /// The daemon could not be reached.
  #[error("cannot connect to the build daemon at {endpoint}: {source}")]
  Connect {
    endpoint: String,
    #[source]
    source: io::Error,
  },

  /// The HTTP exchange failed.
  #[error("request to {path} failed: {source}")]
  Http {
    path: String,
    #[source]
    source: hyper::Error,
  },

  /// The request could not be built.
  #[error("invalid request to {path}: {source}")]
  InvalidRequest {
    path: String,
    #[source]
    source: http::Error,
  },

  /// The daemon answered with a non-success status.
  #[error("daemon returned {status} for {path}: {message}")]
  Status { path: String, status: u16, message: String },

  /// The daemon's response body could not be decoded.
  #[error("invalid response from {path}: {source}")]
  Decode {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  /// An image reference could not be split into repository and tag.
  #[error("invalid image reference '{0}'")]
  InvalidReference(String),
}

impl DaemonError {
  /// Whether the error means the daemon was never reached or dropped the
  /// connection, as opposed to answering with a failure.
  pub fn is_unavailable(&self) -> bool {
    matches!(
      self,
      DaemonError::InvalidHost(_) | DaemonError::Connect { .. } | DaemonError::Http { .. }
    )
  }
}

/// A build submission.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  /// Sealed tar archive of the build context.
  pub context: Bytes,
  /// Labels applied to the produced image.
  pub labels: BTreeMap<String, String>,
  /// Remove intermediate containers even when the build fails.
  pub remove_intermediate: bool,
}

/// Filter for image listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
  /// `key` or `key=value` label selectors; all must match.
  pub labels: Vec<String>,
  pub dangling: Option<bool>,
}

impl ImageFilter {
  /// Dangling images carrying `label`, optionally with a specific value.
  pub fn dangling_with_label(label: &str, value: Option<&str>) -> Self {
    let selector = match value {
      Some(v) => format!("{}={}", label, v),
      None => label.to_string(),
    };
    Self {
      labels: vec![selector],
      dangling: Some(true),
    }
  }

  /// Whether an image with these labels and dangling state passes the filter.
  pub fn matches(&self, labels: &BTreeMap<String, String>, dangling: bool) -> bool {
    if self.dangling.is_some_and(|want| want != dangling) {
      return false;
    }
    self.labels.iter().all(|selector| match selector.split_once('=') {
      Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
      None => labels.contains_key(selector.as_str()),
    })
  }

  /// The `filters` query value understood by the Docker API.
  pub fn to_query(&self) -> String {
    let mut filters: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    if !self.labels.is_empty() {
      filters.insert("label", self.labels.clone());
    }
    if let Some(dangling) = self.dangling {
      filters.insert("dangling", vec![dangling.to_string()]);
    }
    serde_json::Value::from(
      filters
        .into_iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
        .collect::<serde_json::Map<_, _>>(),
    )
    .to_string()
  }
}

/// One image from a listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageSummary {
  #[serde(rename = "Id")]
  pub id: String,
  #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
  pub labels: BTreeMap<String, String>,
  #[serde(rename = "RepoTags", default, deserialize_with = "null_as_default")]
  pub repo_tags: Vec<String>,
  /// Creation time in seconds since the epoch.
  #[serde(rename = "Created", default)]
  pub created: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: serde::Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw progress output of a submitted build.
#[allow(async_fn_in_trait)]
pub trait ProgressSource {
  /// The next chunk of the progress stream, or `None` once it ends.
  async fn next_chunk(&mut self) -> Result<Option<Bytes>, DaemonError>;
}

/// Operations the build coordinator needs from a build daemon.
#[allow(async_fn_in_trait)]
pub trait BuildDaemon {
  type Progress: ProgressSource;

  /// Submit a build and return its progress stream.
  async fn submit_build(&self, request: BuildRequest) -> Result<Self::Progress, DaemonError>;

  async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, DaemonError>;

  /// Point `reference` (`repo[:tag]`) at image `id`.
  async fn tag_image(&self, id: &str, reference: &str) -> Result<(), DaemonError>;

  async fn remove_image(&self, id: &str, force: bool, prune_children: bool) -> Result<(), DaemonError>;
}
