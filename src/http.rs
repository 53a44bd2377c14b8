//! HTTP seam for the negotiator, so tests can script server behaviour.

use std::time::Duration;

pub use reqwest::Url;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Status and body of a completed request. Non-2xx statuses are responses,
/// not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpClient: Send + Sync {
    /// Performs a GET request. Implementations must bound each call by a
    /// timeout.
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpClient + ?Sized> HttpClient for &T {
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        (**self).get(url)
    }
}

/// Default User-Agent string; some public endpoints reject requests without
/// one.
pub const DEFAULT_USER_AGENT: &str = concat!("ogc-discovery/", env!("CARGO_PKG_VERSION"));

/// Blocking client backed by reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl ReqwestClient {
    /// Builds a client with a per-request `timeout`.
    ///
    /// `accept_invalid_certs` disables TLS certificate validation. Many
    /// public-sector endpoints ship broken certificate chains; the flag is
    /// off unless a caller opts in.
    pub fn new(
        timeout: Duration,
        accept_invalid_certs: bool,
        user_agent: &str,
    ) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        if accept_invalid_certs {
            debug!("TLS certificate validation disabled for this client");
        }

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        trace!("GET {}", url);
        let response = self.client.get(url.clone()).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                }
            } else {
                TransportError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                }
            } else {
                TransportError::Body {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
