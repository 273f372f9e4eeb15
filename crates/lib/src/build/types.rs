use std::time::Duration;

use serde::Serialize;

use crate::consts::{DEFAULT_DOCKER_HOST, DOCKER_API_VERSION};
use crate::inputs::FetchedRepository;

/// Environment variable naming the daemon endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Settings for one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
  /// Daemon endpoint (`unix://...`, `tcp://...` or `http://...`).
  pub docker_host: String,
  /// Docker Engine API version used in request paths.
  pub api_version: String,
  /// Upper bound for each repository fetch.
  pub fetch_timeout: Option<Duration>,
  /// Remove intermediate containers even when the build fails.
  pub remove_intermediate: bool,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      docker_host: DEFAULT_DOCKER_HOST.to_string(),
      api_version: DOCKER_API_VERSION.to_string(),
      fetch_timeout: None,
      remove_intermediate: true,
    }
  }
}

impl BuildOptions {
  /// Defaults, with the daemon endpoint taken from `DOCKER_HOST` when set.
  pub fn from_env() -> Self {
    let mut options = Self::default();
    if let Some(host) = std::env::var(DOCKER_HOST_ENV).ok().filter(|h| !h.trim().is_empty()) {
      options.docker_host = host;
    }
    options
  }
}

/// An image that received a tag during promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotedImage {
  pub id: String,
  pub reference: String,
}

/// Report of a completed build run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
  pub tag: String,
  pub repositories: Vec<FetchedRepository>,
  pub context_entries: usize,
  pub context_bytes: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_id: Option<String>,
  pub promoted: Vec<PromotedImage>,
  pub removed: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn from_env_reads_docker_host() {
    temp_env::with_var(DOCKER_HOST_ENV, Some("tcp://build-box:2375"), || {
      let options = BuildOptions::from_env();
      assert_eq!(options.docker_host, "tcp://build-box:2375");
      assert_eq!(options.api_version, "1.24");
      assert!(options.remove_intermediate);
    });
  }

  #[test]
  #[serial]
  fn from_env_falls_back_to_default_socket() {
    temp_env::with_var_unset(DOCKER_HOST_ENV, || {
      assert_eq!(BuildOptions::from_env().docker_host, DEFAULT_DOCKER_HOST);
    });
    temp_env::with_var(DOCKER_HOST_ENV, Some(""), || {
      assert_eq!(BuildOptions::from_env().docker_host, DEFAULT_DOCKER_HOST);
    });
  }
}
