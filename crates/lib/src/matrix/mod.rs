//! Input file parsing.
//!
//! An input file is a Dockerfile prefixed with YAML front matter:
//!
//! ```text
//! ---
//! files:
//!   - config.toml
//! git:
//!   https://github.com/org/service.git: main
//! ---
//! FROM scratch
//! COPY service /service
//! ```
//!
//! A line equal to `---` toggles between front matter and build instructions.
//! Lines outside the delimiters belong to the build instructions.

mod types;

pub use types::*;

use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::FRONT_MATTER_DELIMITER;

/// Errors that can occur while reading an input file.
#[derive(Debug, Error)]
pub enum MatrixError {
  /// The path does not name a readable regular file.
  #[error("please pass a valid input file: '{path}'")]
  InvalidFile {
    path: PathBuf,
    #[source]
    source: Option<io::Error>,
  },

  /// Reading the input failed part way.
  #[error("failed to read input: {0}")]
  Read(#[source] io::Error),

  /// No front matter lines were found.
  #[error("input has no front matter content")]
  EmptyFrontMatter,

  /// No build instruction lines were found.
  #[error("input has no build instructions")]
  EmptyBuildFile,

  /// The front matter is not a valid build matrix.
  #[error("failed to decode front matter: {0}")]
  Decode(#[from] serde_yaml::Error),
}

impl MatrixError {
  /// Whether this error comes from the input itself rather than its decoding.
  pub fn is_input_error(&self) -> bool {
    !matches!(self, MatrixError::Decode(_))
  }
}

/// Split raw input into front matter and build instructions.
///
/// Both halves are returned newline-terminated. Fails if either is empty.
pub fn split_front_matter<R: Read>(reader: R) -> Result<(String, Vec<u8>), MatrixError> {
  let mut front_matter = String::new();
  let mut build_file = Vec::new();
  let mut in_front_matter = false;

  for line in BufReader::new(reader).lines() {
    let line = line.map_err(MatrixError::Read)?;
    let line = line.strip_suffix('\r').unwrap_or(&line);

    if line == FRONT_MATTER_DELIMITER {
      in_front_matter = !in_front_matter;
    } else if in_front_matter {
      front_matter.push_str(line);
      front_matter.push('\n');
    } else {
      build_file.extend_from_slice(line.as_bytes());
      build_file.push(b'\n');
    }
  }

  if front_matter.is_empty() {
    return Err(MatrixError::EmptyFrontMatter);
  }
  if build_file.is_empty() {
    return Err(MatrixError::EmptyBuildFile);
  }

  Ok((front_matter, build_file))
}

/// Parse an input file from any reader.
pub fn parse<R: Read>(reader: R) -> Result<MatrixFile, MatrixError> {
  let (front_matter, build_file) = split_front_matter(reader)?;
  let spec: BuildSpec = serde_yaml::from_str(&front_matter)?;

  debug!(
    files = spec.files.len(),
    repositories = spec.git.len(),
    build_file_bytes = build_file.len(),
    "parsed build matrix"
  );

  Ok(MatrixFile { spec, build_file })
}

/// Parse the input file at `path`.
pub fn load(path: &Path) -> Result<MatrixFile, MatrixError> {
  let invalid = |source| MatrixError::InvalidFile {
    path: path.to_path_buf(),
    source,
  };

  let meta = fs::metadata(path).map_err(|e| invalid(Some(e)))?;
  if meta.is_dir() {
    return Err(invalid(None));
  }
  let file = fs::File::open(path).map_err(|e| invalid(Some(e)))?;
  parse(file)
}

/// Parse the input file from standard input.
pub fn load_stdin() -> Result<MatrixFile, MatrixError> {
  parse(io::stdin().lock())
}
