use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

use super::{ByteStream, EventTransport};
use crate::error::{LiveViewError, Result};
use crate::registry::{backend_error, ApiEndpoints};

/// SSE transport over the backend's `/events/stream` endpoint.
pub struct HttpEventTransport {
    client: Client,
    url: Url,
}

impl HttpEventTransport {
    /// `connect_timeout` bounds the handshake only; the body stays open indefinitely.
    pub fn new(endpoints: &ApiEndpoints, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            url: endpoints.events(),
        })
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn connect(&self) -> Result<ByteStream> {
        debug!("Connecting to {}", self.url);
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, mime::TEXT_EVENT_STREAM.as_ref())
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(backend_error(status, &body));
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .map(|m| m.essence_str() == mime::TEXT_EVENT_STREAM.essence_str())
            .unwrap_or(true);
        if !is_event_stream {
            return Err(LiveViewError::Stream(format!(
                "{} did not answer with {}",
                self.url,
                mime::TEXT_EVENT_STREAM
            )));
        }

        Ok(response.bytes_stream().map_err(LiveViewError::from).boxed())
    }
}
