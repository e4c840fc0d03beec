//! HTTP transport backed by `reqwest`.

use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

use super::transport::{ByteStream, OpenFuture, OpenRequest, StreamTransport};

/// Opens generation streams against the chat API.
///
/// Requests carry the session cookie verbatim; authentication itself is
/// owned by the server.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
    session_cookie: Option<String>,
}

impl HttpTransport {
    /// Build a transport for `base_url` (API root, no trailing slash needed).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        session_cookie: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            session_cookie,
        })
    }

    /// Build a transport from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Self::new(
            config.base_url(),
            config.session_cookie.clone(),
            config.connect_timeout(),
        )
    }

    /// Absolute URL for `request`.
    #[must_use]
    pub fn url_for(&self, request: &OpenRequest) -> String {
        format!("{}{}", self.base_url, request.path())
    }

    async fn send(self, request: OpenRequest) -> Result<ByteStream> {
        let url = self.url_for(&request);
        let mut builder = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&request.body());
        if let Some(cookie) = &self.session_cookie {
            builder = builder.header(COOKIE, cookie);
        }

        debug!(mode = request.mode(), url, "opening stream");
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(mode = request.mode(), %status, "stream request rejected");
            return Err(AppError::Transport(format!(
                "{} request failed: {} - {}",
                request.mode(),
                status,
                body
            )));
        }

        info!(
            mode = request.mode(),
            task_id = request.task_id(),
            "stream opened"
        );

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(body.boxed())
    }
}

impl StreamTransport for HttpTransport {
    fn open(&self, request: OpenRequest, cancel: CancellationToken) -> OpenFuture {
        let transport = self.clone();
        Box::pin(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(AppError::Cancelled),
                result = transport.send(request) => result,
            }
        })
    }
}
