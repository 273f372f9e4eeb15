//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the input file, any
/// local files it declares, and the path of a daemon socket nobody listens on.
pub struct TestEnv {
  pub temp: TempDir,
  pub input_path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let input_path = temp.path().join("build.df");
    Self { temp, input_path }
  }

  /// Write the input file from front matter and build instructions.
  pub fn write_input(&self, front_matter: &str, instructions: &str) {
    std::fs::write(&self.input_path, format!("---\n{}---\n{}", front_matter, instructions)).unwrap();
  }

  /// Write a file relative to the temp directory and return its path.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Path inside the temp directory, not created.
  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Daemon endpoint that refuses connections.
  pub fn dead_daemon(&self) -> String {
    format!("unix://{}", self.path("docker.sock").display())
  }

  /// Get a pre-configured Command for the frontbuild binary.
  ///
  /// Points `DOCKER_HOST` at [`TestEnv::dead_daemon`] and clears `RUST_LOG`.
  pub fn frontbuild_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("frontbuild");
    cmd.env("DOCKER_HOST", self.dead_daemon());
    cmd.env_remove("RUST_LOG");
    cmd.current_dir(self.temp.path());
    cmd
  }
}
