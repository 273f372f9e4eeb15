//! Implementation of the `frontbuild` build command.
//!
//! Reads an input file, fetches the declared repositories, assembles the
//! build context, and drives the daemon through build, tag, and cleanup.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use frontbuild_lib::build::{BuildOptions, BuildSummary, Builder};
use frontbuild_lib::daemon::DockerClient;
use frontbuild_lib::inputs::GixCloner;
use frontbuild_lib::matrix::{self, MatrixFile};
use frontbuild_lib::platform::HostFs;

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success, truncate_hash,
};

/// Everything the build command needs from the command line.
#[derive(Debug, Clone)]
pub struct BuildArgs {
  /// Input file; `None` reads standard input.
  pub input: Option<PathBuf>,
  pub tag: String,
  pub branch: Option<String>,
  pub docker_host: String,
  pub fetch_timeout: Option<Duration>,
  pub output: OutputFormat,
}

/// Execute the build command.
///
/// Progress from the daemon goes to stdout in text mode and to stderr in JSON
/// mode, so JSON output stays machine-readable.
pub fn cmd_build(args: &BuildArgs) -> Result<()> {
  let start = Instant::now();
  let parsed = read_input(args.input.as_deref())?;

  let options = BuildOptions {
    docker_host: args.docker_host.clone(),
    fetch_timeout: args.fetch_timeout,
    ..BuildOptions::default()
  };
  let daemon = DockerClient::from_host(&options.docker_host, options.api_version.clone())
    .context("Invalid build daemon host")?;
  info!(host = %daemon.host(), "using build daemon");

  let builder = Builder::new(Arc::new(GixCloner), daemon, Arc::new(HostFs), &options);
  let branch = args.branch.as_deref().filter(|b| !b.is_empty());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let summary = if args.output.is_json() {
    let mut sink = io::stderr().lock();
    rt.block_on(builder.run(&parsed.spec, &parsed.build_file, &args.tag, branch, &mut sink))?
  } else {
    let mut sink = io::stdout().lock();
    let summary = rt.block_on(builder.run(&parsed.spec, &parsed.build_file, &args.tag, branch, &mut sink))?;
    sink.flush().context("Failed to flush build output")?;
    summary
  };

  if args.output.is_json() {
    print_json(&summary)?;
  } else {
    print_summary(&summary, start.elapsed());
  }

  Ok(())
}

fn read_input(input: Option<&Path>) -> Result<MatrixFile> {
  let (loaded, source) = match input {
    Some(path) => (matrix::load(path), path.display().to_string()),
    None => (matrix::load_stdin(), "stdin".to_string()),
  };
  let parsed = loaded.map_err(|err| {
    let what = if err.is_input_error() {
      "Failed to read input from"
    } else {
      "Invalid build matrix in"
    };
    anyhow::Error::new(err).context(format!("{what} {source}"))
  })?;
  if parsed.spec.is_empty() {
    info!("no local files or repositories declared");
  }
  Ok(parsed)
}

fn print_summary(summary: &BuildSummary, elapsed: Duration) {
  println!();
  print_success(&format!("Build complete in {}", format_duration(elapsed)));

  if let Some(id) = &summary.image_id {
    print_stat("Image", truncate_hash(id.trim_start_matches("sha256:")));
  }
  print_stat(
    "Context",
    &format!(
      "{} entries, {}",
      summary.context_entries,
      format_bytes(summary.context_bytes)
    ),
  );
  print_stat("Repositories", &summary.repositories.len().to_string());
  for repo in &summary.repositories {
    let commit = repo.commit.as_deref().map(truncate_hash).unwrap_or("unknown");
    print_info(&format!("{} @ {} ({}) -> {}/", repo.url, repo.reference, commit, repo.folder));
  }

  for image in &summary.promoted {
    print_stat(
      "Tagged",
      &format!("{} as {}", truncate_hash(image.id.trim_start_matches("sha256:")), image.reference),
    );
  }
  print_stat("Removed", &summary.removed.len().to_string());
}
