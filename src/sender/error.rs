use super::serialization::SerializationError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Raised while turning a [`ClientConfig`](super::ClientConfig) into a client.
/// Always fatal; nothing has touched the network yet.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing URL")]
    MissingUrl,
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("unix socket URL {0:?} has no socket path")]
    MissingSocketPath(String),
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("invalid proxy {url:?}: {source}")]
    InvalidProxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS configuration error: {0}")]
    Tls(#[source] reqwest::Error),
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Raw transport-level failure: nothing was classified because no response arrived.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("connecting to unix socket {path} failed: {source}", path = .path.display())]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP exchange over unix socket failed: {0}")]
    SocketExchange(#[from] hyper::Error),
    #[error("building request for {url} failed: {reason}")]
    InvalidRequest { url: String, reason: String },
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("client is closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Request { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// An error response from the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status_code: u16,
    /// The HTTP status line, e.g. `"503 Service Unavailable"`.
    pub title: String,
    pub description: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description.as_deref() {
            Some(description) if !description.is_empty() => {
                write!(f, "{}: {}", self.title, description)
            }
            _ => f.write_str(&self.title),
        }
    }
}

impl std::error::Error for ApiError {}

/// A server error whose description says the destination bucket does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{api} (bucket {bucket:?})")]
pub struct BucketNotFoundError {
    pub api: ApiError,
    pub bucket: String,
}

/// Failure while resolving the organization or creating a bucket.
#[derive(Error, Debug)]
pub enum BucketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("decoding organization lookup response failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to get ID for org {org:?} (do you have org-level read permissions?)")]
    OrganizationNotFound { org: String },
}

/// Everything `write` can hand back to the scheduler.
///
/// Dropped payloads (400/406/413/422 and other client errors) never show up
/// here: they are logged and swallowed.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("retry time has not elapsed ({remaining:?} remaining)")]
    RetryWindowActive { remaining: Duration },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to write metric: {0}")]
    Unauthorized(ApiError),
    #[error("waiting {retry_in:?} for server before sending metric again ({status})")]
    Throttled { retry_in: Duration, status: String },
    #[error(transparent)]
    Api(ApiError),
    #[error(transparent)]
    BucketNotFound(BucketNotFoundError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("write cancelled")]
    Cancelled,
    #[error("client is closed")]
    Closed,
}

impl WriteError {
    /// Whether re-offering the same batch later can succeed without operator
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            WriteError::RetryWindowActive { .. }
            | WriteError::Transport(_)
            | WriteError::Throttled { .. }
            | WriteError::Api(_)
            | WriteError::BucketNotFound(_)
            | WriteError::Cancelled => true,
            WriteError::Unauthorized(_) | WriteError::Serialization(_) | WriteError::Closed => {
                false
            }
        }
    }
}
