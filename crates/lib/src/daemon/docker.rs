//! Docker Engine API client.
//!
//! Every call opens its own HTTP/1.1 connection to the daemon socket. The
//! connection is driven by a spawned task, so a build's progress body keeps
//! streaming after [`DockerClient::submit_build`] returns.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use http::{Method, Request, Response, header};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};
use url::{Url, form_urlencoded};

use super::{BuildDaemon, BuildRequest, DaemonError, ImageFilter, ImageSummary, ProgressSource};

/// Port used for `tcp://` hosts that do not name one.
const DEFAULT_TCP_PORT: u16 = 2375;

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
  Unix(PathBuf),
  Tcp { host: String, port: u16 },
}

impl DockerHost {
  /// Parse a `unix://`, `tcp://` or `http://` endpoint.
  pub fn parse(raw: &str) -> Result<Self, DaemonError> {
    let invalid = || DaemonError::InvalidHost(raw.to_string());
    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;

    match url.scheme() {
      "unix" => {
        let path = url.path();
        if path.is_empty() || path == "/" {
          return Err(invalid());
        }
        Ok(DockerHost::Unix(PathBuf::from(path)))
      }
      "tcp" | "http" => {
        let host = url.host_str().ok_or_else(invalid)?;
        Ok(DockerHost::Tcp {
          host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
          port: url.port().unwrap_or(DEFAULT_TCP_PORT),
        })
      }
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for DockerHost {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DockerHost::Unix(path) => write!(f, "unix://{}", path.display()),
      DockerHost::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
    }
  }
}

/// Split `repo[:tag]`. A colon before the last `/` belongs to a registry
/// port, not a tag.
pub fn split_reference(reference: &str) -> Result<(&str, Option<&str>), DaemonError> {
  let invalid = || DaemonError::InvalidReference(reference.to_string());
  if reference.is_empty() || reference.contains('@') || reference.contains(char::is_whitespace) {
    return Err(invalid());
  }

  let name_start = reference.rfind('/').map_or(0, |i| i + 1);
  match reference[name_start..].rfind(':') {
    Some(i) => {
      let split = name_start + i;
      let (repo, tag) = (&reference[..split], &reference[split + 1..]);
      if repo.is_empty() || tag.is_empty() {
        return Err(invalid());
      }
      Ok((repo, Some(tag)))
    }
    None => Ok((reference, None)),
  }
}

/// [`BuildDaemon`] over the Docker Engine HTTP API.
#[derive(Debug, Clone)]
pub struct DockerClient {
  host: DockerHost,
  api_version: String,
}

impl DockerClient {
  pub fn new(host: DockerHost, api_version: impl Into<String>) -> Self {
    Self {
      host,
      api_version: api_version.into(),
    }
  }

  /// Parse `host` and build a client for it.
  pub fn from_host(host: &str, api_version: impl Into<String>) -> Result<Self, DaemonError> {
    Ok(Self::new(DockerHost::parse(host)?, api_version))
  }

  pub fn host(&self) -> &DockerHost {
    &self.host
  }

  /// Versioned request path with an encoded query string.
  fn path(&self, endpoint: &str, query: &[(&str, &str)]) -> String {
    let mut path = format!("/v{}{}", self.api_version, endpoint);
    if !query.is_empty() {
      let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query)
        .finish();
      path.push('?');
      path.push_str(&encoded);
    }
    path
  }

  async fn open(&self) -> Result<SendRequest<Full<Bytes>>, DaemonError> {
    let endpoint = self.host.to_string();
    let connect_error = |source| DaemonError::Connect {
      endpoint: endpoint.clone(),
      source,
    };

    match &self.host {
      #[cfg(unix)]
      DockerHost::Unix(path) => {
        let stream = tokio::net::UnixStream::connect(path).await.map_err(connect_error)?;
        handshake(stream, &endpoint).await
      }
      #[cfg(not(unix))]
      DockerHost::Unix(_) => Err(connect_error(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "unix sockets are not supported on this platform",
      ))),
      DockerHost::Tcp { host, port } => {
        let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(connect_error)?;
        handshake(stream, &endpoint).await
      }
    }
  }

  async fn send(
    &self,
    method: Method,
    path: String,
    body: Bytes,
    content_type: Option<&str>,
  ) -> Result<Response<Incoming>, DaemonError> {
    let mut sender = self.open().await?;

    let mut builder = Request::builder()
      .method(method.clone())
      .uri(path.as_str())
      .header(header::HOST, "docker");
    if let Some(content_type) = content_type {
      builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    let request = builder
      .body(Full::new(body))
      .map_err(|source| DaemonError::InvalidRequest {
        path: path.clone(),
        source,
      })?;

    debug!(method = %method, path = %path, "daemon request");
    let response = sender
      .send_request(request)
      .await
      .map_err(|source| DaemonError::Http {
        path: path.clone(),
        source,
      })?;

    let status = response.status();
    trace!(path = %path, status = status.as_u16(), "daemon response");
    if status.is_success() {
      return Ok(response);
    }

    let message = match response.into_body().collect().await {
      Ok(collected) => error_message(&collected.to_bytes()),
      Err(e) => e.to_string(),
    };
    Err(DaemonError::Status {
      path,
      status: status.as_u16(),
      message,
    })
  }
}

async fn handshake<S>(stream: S, endpoint: &str) -> Result<SendRequest<Full<Bytes>>, DaemonError>
where
  S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
  let (sender, connection) = http1::handshake(TokioIo::new(stream))
    .await
    .map_err(|source| DaemonError::Http {
      path: endpoint.to_string(),
      source,
    })?;

  tokio::spawn(async move {
    if let Err(e) = connection.await {
      debug!(error = %e, "daemon connection closed");
    }
  });

  Ok(sender)
}

/// The daemon's `{"message": ...}` error body, or the raw text.
fn error_message(body: &[u8]) -> String {
  #[derive(Deserialize)]
  struct ApiError {
    message: String,
  }

  serde_json::from_slice::<ApiError>(body)
    .map(|e| e.message)
    .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string())
}

/// Progress body of a running build.
pub struct DockerProgress {
  path: String,
  body: Incoming,
}

impl ProgressSource for DockerProgress {
  async fn next_chunk(&mut self) -> Result<Option<Bytes>, DaemonError> {
    loop {
      match self.body.frame().await {
        None => return Ok(None),
        Some(Err(source)) => {
          return Err(DaemonError::Http {
            path: self.path.clone(),
            source,
          });
        }
        Some(Ok(frame)) => {
          if let Ok(data) = frame.into_data() {
            return Ok(Some(data));
          }
        }
      }
    }
  }
}

impl BuildDaemon for DockerClient {
  type Progress = DockerProgress;

  async fn submit_build(&self, request: BuildRequest) -> Result<DockerProgress, DaemonError> {
    let labels = serde_json::to_string(&request.labels).map_err(|source| DaemonError::Decode {
      path: "/build".to_string(),
      source,
    })?;

    let mut query = vec![("labels", labels.as_str())];
    if request.remove_intermediate {
      query.push(("forcerm", "1"));
    }
    let path = self.path("/build", &query);

    debug!(bytes = request.context.len(), "submitting build context");
    let response = self
      .send(Method::POST, path.clone(), request.context, Some("application/x-tar"))
      .await?;

    Ok(DockerProgress {
      path,
      body: response.into_body(),
    })
  }

  async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, DaemonError> {
    let filters = filter.to_query();
    let path = self.path("/images/json", &[("filters", filters.as_str())]);
    let response = self.send(Method::GET, path.clone(), Bytes::new(), None).await?;

    let body = response
      .into_body()
      .collect()
      .await
      .map_err(|source| DaemonError::Http {
        path: path.clone(),
        source,
      })?
      .to_bytes();

    serde_json::from_slice(&body).map_err(|source| DaemonError::Decode { path, source })
  }

  async fn tag_image(&self, id: &str, reference: &str) -> Result<(), DaemonError> {
    let (repo, tag) = split_reference(reference)?;
    let mut query = vec![("repo", repo)];
    if let Some(tag) = tag {
      query.push(("tag", tag));
    }
    let path = self.path(&format!("/images/{}/tag", id), &query);
    self.send(Method::POST, path, Bytes::new(), None).await?;
    Ok(())
  }

  async fn remove_image(&self, id: &str, force: bool, prune_children: bool) -> Result<(), DaemonError> {
    let force = if force { "1" } else { "0" };
    let noprune = if prune_children { "0" } else { "1" };
    let path = self.path(&format!("/images/{}", id), &[("force", force), ("noprune", noprune)]);
    self.send(Method::DELETE, path, Bytes::new(), None).await?;
    Ok(())
  }
}
