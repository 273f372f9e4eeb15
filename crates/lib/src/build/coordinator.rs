//! Build, promote, and clean up against the daemon.
//!
//! The protocol is strictly sequential:
//!
//! 1. Submit the sealed context and relay progress until the stream ends
//! 2. Tag every dangling image carrying the build label
//! 3. Take a fresh listing with the same filter and remove what is left
//!
//! Tagging an image moves the tag away from its previous holder, which turns
//! that image dangling; step 3 collects it.

use std::collections::BTreeMap;
use std::io::Write;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::PromotedImage;
use crate::consts::BUILD_TAG_LABEL;
use crate::daemon::{
  BuildDaemon, BuildRequest, DaemonError, ImageFilter, ImageSummary, MessageDecoder, ProgressSource, StreamError,
  render_message,
};

/// Errors that can occur while building, promoting, or cleaning up images.
#[derive(Debug, Error)]
pub enum CoordinatorError {
  /// The daemon could not be reached.
  #[error("build daemon unavailable: {0}")]
  DaemonUnavailable(#[source] DaemonError),

  /// The daemon rejected the build or reported a failure while building.
  #[error("build failed: {message}")]
  BuildFailed { message: String },

  /// The progress stream could not be relayed.
  #[error("failed to display build progress: {0}")]
  StreamDisplay(#[source] StreamError),

  #[error("failed to list images: {0}")]
  ListImage(#[source] DaemonError),

  #[error("failed to tag image {id} as '{reference}': {source}")]
  TagImage {
    id: String,
    reference: String,
    #[source]
    source: DaemonError,
  },

  #[error("failed to remove image {id}: {source}")]
  RemoveImage {
    id: String,
    #[source]
    source: DaemonError,
  },
}

/// What a completed build left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
  /// Image id announced by the daemon, if it sent one.
  pub image_id: Option<String>,
  pub promoted: Vec<PromotedImage>,
  pub removed: Vec<String>,
}

/// Drives one build through submission, promotion, and cleanup.
pub struct Coordinator<'a, D> {
  daemon: &'a D,
  remove_intermediate: bool,
}

impl<'a, D: BuildDaemon> Coordinator<'a, D> {
  pub fn new(daemon: &'a D) -> Self {
    Self {
      daemon,
      remove_intermediate: true,
    }
  }

  /// Whether intermediate containers are removed even when the build fails.
  pub fn remove_intermediate(mut self, remove: bool) -> Self {
    self.remove_intermediate = remove;
    self
  }

  /// Run the whole protocol for a sealed context.
  ///
  /// A non-empty `tag` is attached as the build label and every matching
  /// dangling image is tagged with it. With an empty tag, every dangling image
  /// carrying the label is tagged with its own label value.
  pub async fn run(&self, context: Bytes, tag: &str, sink: &mut dyn Write) -> Result<BuildOutcome, CoordinatorError> {
    let progress = self.submit(context, tag).await?;
    let image_id = observe(progress, sink).await?;
    let promoted = self.promote(tag).await?;
    let removed = self.cleanup(tag).await?;

    Ok(BuildOutcome {
      image_id,
      promoted,
      removed,
    })
  }

  /// Submit the context and return the progress stream.
  pub async fn submit(&self, context: Bytes, tag: &str) -> Result<D::Progress, CoordinatorError> {
    let mut labels = BTreeMap::new();
    if !tag.is_empty() {
      labels.insert(BUILD_TAG_LABEL.to_string(), tag.to_string());
    }

    info!(bytes = context.len(), tag, "submitting build");
    let request = BuildRequest {
      context,
      labels,
      remove_intermediate: self.remove_intermediate,
    };

    self.daemon.submit_build(request).await.map_err(|e| match e {
      DaemonError::Status { message, .. } => CoordinatorError::BuildFailed { message },
      other if other.is_unavailable() => CoordinatorError::DaemonUnavailable(other),
      other => CoordinatorError::BuildFailed {
        message: other.to_string(),
      },
    })
  }

  /// Tag every candidate image. Images are tagged oldest first so the newest
  /// build ends up holding a shared tag.
  pub async fn promote(&self, tag: &str) -> Result<Vec<PromotedImage>, CoordinatorError> {
    let mut images = self.candidates(tag).await?;
    images.sort_by_key(|image| image.created);

    let mut promoted = Vec::with_capacity(images.len());
    for image in images {
      let reference = if tag.is_empty() {
        image.labels.get(BUILD_TAG_LABEL).cloned().unwrap_or_default()
      } else {
        tag.to_string()
      };
      if reference.is_empty() {
        warn!(id = %image.id, "skipping image with an empty build label");
        continue;
      }

      self
        .daemon
        .tag_image(&image.id, &reference)
        .await
        .map_err(|source| CoordinatorError::TagImage {
          id: image.id.clone(),
          reference: reference.clone(),
          source,
        })?;
      info!(id = %image.id, reference = %reference, "image tagged");
      promoted.push(PromotedImage { id: image.id, reference });
    }

    Ok(promoted)
  }

  /// Remove every candidate still dangling after promotion.
  pub async fn cleanup(&self, tag: &str) -> Result<Vec<String>, CoordinatorError> {
    let images = self.candidates(tag).await?;
    if images.is_empty() {
      debug!("nothing to clean up");
    }

    let mut removed = Vec::with_capacity(images.len());
    for image in images {
      self
        .daemon
        .remove_image(&image.id, true, true)
        .await
        .map_err(|source| CoordinatorError::RemoveImage {
          id: image.id.clone(),
          source,
        })?;
      info!(id = %image.id, "stale image removed");
      removed.push(image.id);
    }

    Ok(removed)
  }

  async fn candidates(&self, tag: &str) -> Result<Vec<ImageSummary>, CoordinatorError> {
    let value = (!tag.is_empty()).then_some(tag);
    let filter = ImageFilter::dangling_with_label(BUILD_TAG_LABEL, value);
    self.daemon.list_images(&filter).await.map_err(CoordinatorError::ListImage)
  }
}

/// Relay progress to `sink` until the stream ends.
///
/// Returns the image id the daemon announced, if any. An error message in the
/// stream fails the build.
pub async fn observe<P: ProgressSource>(mut progress: P, sink: &mut dyn Write) -> Result<Option<String>, CoordinatorError> {
  let mut decoder = MessageDecoder::new();
  let mut image_id = None;

  while let Some(chunk) = progress
    .next_chunk()
    .await
    .map_err(|e| CoordinatorError::StreamDisplay(e.into()))?
  {
    let messages = decoder.push(&chunk).map_err(CoordinatorError::StreamDisplay)?;
    for message in messages {
      if let Some(failure) = message.failure() {
        return Err(CoordinatorError::BuildFailed { message: failure });
      }
      if let Some(id) = message.image_id() {
        debug!(id, "daemon reported image");
        image_id = Some(id.to_string());
      }
      render_message(&message, sink).map_err(|e| CoordinatorError::StreamDisplay(e.into()))?;
    }
  }

  decoder.finish().map_err(CoordinatorError::StreamDisplay)?;
  sink.flush().map_err(|e| CoordinatorError::StreamDisplay(e.into()))?;
  Ok(image_id)
}
