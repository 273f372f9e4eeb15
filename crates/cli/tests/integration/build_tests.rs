//! Build command integration tests.
//!
//! No daemon runs during these tests, so every build ends at or before the
//! build stage.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn unreachable_daemon_fails_the_build_stage() {
  let env = TestEnv::new();
  env.write_input("files: []\n", "FROM scratch\n");

  env
    .frontbuild_cmd()
    .arg(&env.input_path)
    .args(["-t", "app:1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("build stage failed"))
    .stderr(predicate::str::contains("build daemon unavailable"))
    .stderr(predicate::str::contains("docker.sock"));
}

#[test]
fn missing_local_file_fails_before_the_daemon() {
  let env = TestEnv::new();
  let missing = env.path("conf/missing.toml");
  env.write_input(&format!("files:\n  - {}\n", missing.display()), "FROM scratch\n");

  env
    .frontbuild_cmd()
    .arg(&env.input_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("context stage failed"))
    .stderr(predicate::str::contains("missing.toml"))
    .stderr(predicate::str::contains("daemon").not());
}

#[test]
fn local_files_are_assembled_before_submission() {
  let env = TestEnv::new();
  let config = env.write_file("app.toml", "port = 8080\n");
  env.write_file("assets/logo.svg", "<svg/>");
  env.write_file("assets/nested/skip.txt", "deep");
  let assets = env.path("assets");
  env.write_input(
    &format!("files:\n  - {}\n  - {}\n", config.display(), assets.display()),
    "FROM scratch\nCOPY app.toml /etc/app.toml\n",
  );

  // Dockerfile, app.toml, assets/ and assets/logo.svg; the nested directory is skipped.
  env
    .frontbuild_cmd()
    .arg(&env.input_path)
    .arg("-vv")
    .assert()
    .failure()
    .stderr(predicate::str::contains("context sealed"))
    .stderr(predicate::str::contains("entries=4"))
    .stderr(predicate::str::contains("skipping non-file entry"))
    .stderr(predicate::str::contains("build daemon unavailable"));
}

#[test]
fn host_flag_overrides_environment() {
  let env = TestEnv::new();
  env.write_input("files: []\n", "FROM scratch\n");

  env
    .frontbuild_cmd()
    .arg(&env.input_path)
    .args(["--host", "ssh://builder"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid build daemon host"));
}

#[test]
fn stdin_input_reaches_the_build_stage() {
  let env = TestEnv::new();

  env
    .frontbuild_cmd()
    .write_stdin("---\ngit: {}\n---\nFROM scratch\n")
    .assert()
    .failure()
    .stderr(predicate::str::contains("build stage failed"));
}

#[test]
fn verbose_logs_stage_transitions() {
  let env = TestEnv::new();
  env.write_input("files: []\n", "FROM scratch\n");

  env
    .frontbuild_cmd()
    .arg(&env.input_path)
    .arg("-v")
    .assert()
    .failure()
    .stderr(predicate::str::contains("starting stage"));
}
