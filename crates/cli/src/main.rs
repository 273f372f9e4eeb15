mod cmd;
mod output;

use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use frontbuild_lib::consts::{APP_NAME, DEFAULT_DOCKER_HOST};

use crate::cmd::{BuildArgs, cmd_build};
use crate::output::{OutputFormat, format_error_chain, print_error};

/// Build a container image from a Dockerfile carrying a YAML build matrix
#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Input file (front matter followed by Dockerfile instructions); `-` or
  /// omitted reads standard input
  file: Option<PathBuf>,

  /// Tag for the built image
  #[arg(short, long, default_value = "")]
  tag: String,

  /// Fetch this branch for every repository instead of the declared refs
  #[arg(short, long)]
  branch: Option<String>,

  /// Build daemon endpoint (unix:// or tcp://)
  #[arg(long, env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
  host: String,

  /// Abort a repository fetch that runs longer than this (e.g. 90s, 5m)
  #[arg(long, value_parser = humantime::parse_duration)]
  fetch_timeout: Option<Duration>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,

  /// Summary format
  #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,
}

/// Rewrite the single-dash `-branch` spelling to `--branch`.
///
/// Clap would otherwise read `-branch dev` as `-b ranch` plus a positional.
fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
  let mut after_separator = false;
  args
    .into_iter()
    .map(|arg| {
      if after_separator {
        return arg;
      }
      match arg.to_str() {
        Some("--") => {
          after_separator = true;
          arg
        }
        Some("-branch") => OsString::from("--branch"),
        Some(s) if s.starts_with("-branch=") => OsString::from(format!("-{s}")),
        _ => arg,
      }
    })
    .collect()
}

fn main() -> ExitCode {
  let cli = Cli::parse_from(normalize_args(std::env::args_os()));
  init_tracing(cli.verbose);

  let input = cli.file.filter(|p| p.as_os_str() != "-");
  let docker_host = if cli.host.trim().is_empty() {
    DEFAULT_DOCKER_HOST.to_string()
  } else {
    cli.host
  };

  let args = BuildArgs {
    input,
    tag: cli.tag,
    branch: cli.branch,
    docker_host,
    fetch_timeout: cli.fetch_timeout,
    output: cli.output,
  };

  match cmd_build(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format_error_chain(&e));
      ExitCode::FAILURE
    }
  }
}

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_ansi(io::stderr().is_terminal())
    .without_time()
    .init();
}
