//! Network transport for the last tier.
//!
//! Fetchers receive the task's cancellation token and must give up promptly
//! when it fires. [`HttpFetcher`] races the request against the token, so a
//! canceled load drops the in-flight connection.

use crate::request::ImageRequest;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// User agent sent by [`HttpFetcher`].
pub const DEFAULT_USER_AGENT: &str = concat!("imagetier/", env!("CARGO_PKG_VERSION"));

/// Fetch errors.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request timed out")]
    Timeout,

    #[error("request canceled")]
    Canceled,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Future returned by [`NetworkFetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, FetchError>> + Send + 'a>>;

/// Pluggable, abortable network transport.
pub trait NetworkFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        request: &'a ImageRequest,
        cancel: &'a CancellationToken,
    ) -> FetchFuture<'a>;
}

/// [`NetworkFetcher`] using an async reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with the given connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        trace!(url = url, "HTTP GET request starting");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(
                url = url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "HTTP request failed"
            );
            map_reqwest_error(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "HTTP error status");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        debug!(url = url, bytes = body.len(), "HTTP response received");
        Ok(body)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Request(e.to_string())
    }
}

impl NetworkFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        request: &'a ImageRequest,
        cancel: &'a CancellationToken,
    ) -> FetchFuture<'a> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(url = %request.url, "fetch aborted");
                    Err(FetchError::Canceled)
                }
                result = self.get(&request.url) => result,
            }
        })
    }
}
