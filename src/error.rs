use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ServiceFamily;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid service URL '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("unsupported URL scheme '{scheme}' in '{url}' (expected http or https)")]
    UnsupportedScheme { url: String, scheme: String },
}

/// The body could not be read as a well-formed XML document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed XML: {0}")]
pub struct MalformedXml(pub String);

/// A single HTTP attempt that never produced a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Why one candidate version was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The server answered with a non-2xx status.
    Status(u16),
    /// 2xx, but the body is not well-formed XML.
    Malformed(String),
    /// Well-formed XML without any recognizable layer element.
    NoLayerElements,
    /// The attempt failed before any response arrived.
    Unreachable(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Status(code) => write!(f, "HTTP status {}", code),
            Rejection::Malformed(reason) => write!(f, "malformed XML: {}", reason),
            Rejection::NoLayerElements => f.write_str("no layer elements in document"),
            Rejection::Unreachable(reason) => write!(f, "unreachable: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub version: String,
    pub reason: Rejection,
}

impl fmt::Display for RejectedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.reason)
    }
}

fn join_rejections(tried: &[RejectedCandidate]) -> String {
    tried
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// No candidate produced an HTTP response at all.
    #[error("could not connect to {family} service at {url}: {source}")]
    Connection {
        url: String,
        family: ServiceFamily,
        #[source]
        source: TransportError,
    },

    #[error("no compatible {family} version at {url}; tried {}", join_rejections(.tried))]
    NoCompatibleVersion {
        url: String,
        family: ServiceFamily,
        tried: Vec<RejectedCandidate>,
    },

    #[error("{family} {version} capabilities at {url} list no named layers")]
    EmptyResult {
        url: String,
        family: ServiceFamily,
        version: String,
    },
}

impl DiscoveryError {
    /// Generic text suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            DiscoveryError::Endpoint(_) => "invalid service URL",
            DiscoveryError::Connection { .. } => "server unreachable",
            DiscoveryError::NoCompatibleVersion { .. } => "no compatible service version found",
            DiscoveryError::EmptyResult { .. } => "no layers found",
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, DiscoveryError::Connection { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("load session '{0}' already exists")]
    DuplicateSession(String),

    #[error("load session '{0}' not found")]
    SessionNotFound(String),

    #[error("load session '{id}' failed: {reason}")]
    LoadFailed { id: String, reason: String },
}

impl ReadinessError {
    pub fn user_message(&self) -> String {
        match self {
            ReadinessError::DuplicateSession(_) => "layer is already being loaded".to_string(),
            ReadinessError::SessionNotFound(_) => "layer not found".to_string(),
            ReadinessError::LoadFailed { reason, .. } => reason.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
