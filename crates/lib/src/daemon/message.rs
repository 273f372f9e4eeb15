//! Build progress messages.
//!
//! The daemon answers a build with a stream of concatenated JSON objects. The
//! stream is chunked arbitrarily, so [`MessageDecoder`] buffers until whole
//! objects are available.

use std::io::{self, Write};

use serde::Deserialize;
use thiserror::Error;

use super::DaemonError;

/// Errors that can occur while relaying build progress.
#[derive(Debug, Error)]
pub enum StreamError {
  #[error("malformed progress message: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("progress stream ended inside a message ({0} bytes pending)")]
  Truncated(usize),

  #[error("failed to write progress: {0}")]
  Write(#[from] io::Error),

  #[error("progress stream interrupted: {0}")]
  Interrupted(#[from] DaemonError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
  #[serde(default)]
  pub code: Option<i64>,
  #[serde(default)]
  pub message: String,
}

/// One progress message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMessage {
  #[serde(default)]
  pub stream: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub progress: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub error_detail: Option<ErrorDetail>,
  #[serde(default)]
  pub aux: Option<serde_json::Value>,
}

impl JsonMessage {
  /// The failure this message reports, if any.
  pub fn failure(&self) -> Option<String> {
    match (&self.error_detail, &self.error) {
      (Some(detail), _) if !detail.message.is_empty() => Some(detail.message.clone()),
      (_, Some(error)) => Some(error.clone()),
      _ => None,
    }
  }

  /// Image id announced through an `aux` message.
  pub fn image_id(&self) -> Option<&str> {
    self.aux.as_ref()?.get("ID")?.as_str()
  }
}

/// Incremental decoder for a chunked message stream.
#[derive(Debug, Default)]
pub struct MessageDecoder {
  pending: Vec<u8>,
}

impl MessageDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a chunk and return every message it completed.
  pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<JsonMessage>, StreamError> {
    self.pending.extend_from_slice(chunk);

    let mut messages = Vec::new();
    let consumed = {
      let mut stream = serde_json::Deserializer::from_slice(&self.pending).into_iter::<JsonMessage>();
      loop {
        let offset = stream.byte_offset();
        match stream.next() {
          None => break stream.byte_offset(),
          Some(Ok(message)) => messages.push(message),
          Some(Err(e)) if e.is_eof() => break offset,
          Some(Err(e)) => return Err(e.into()),
        }
      }
    };

    self.pending.drain(..consumed);
    Ok(messages)
  }

  /// Fail if the stream ended in the middle of a message.
  pub fn finish(&self) -> Result<(), StreamError> {
    if self.pending.iter().all(u8::is_ascii_whitespace) {
      Ok(())
    } else {
      Err(StreamError::Truncated(self.pending.len()))
    }
  }
}

/// Write one message the way a non-interactive terminal shows it.
pub fn render_message(message: &JsonMessage, out: &mut dyn Write) -> io::Result<()> {
  if let Some(stream) = &message.stream {
    return out.write_all(stream.as_bytes());
  }

  let Some(status) = &message.status else {
    return Ok(());
  };
  if let Some(id) = &message.id {
    write!(out, "{}: ", id)?;
  }
  match &message.progress {
    Some(progress) if !progress.is_empty() => writeln!(out, "{} {}", status, progress),
    _ => writeln!(out, "{}", status),
  }
}
