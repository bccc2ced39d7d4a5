use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tracing::debug;

use veil_core::errors::ExchangeError;

use crate::wire::{Frame, RequestEnvelope};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw response bytes from the service, before frame splitting.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ExchangeError>> + Send>>;

/// The service endpoints one exchange touches. The engine talks to this
/// trait so every pipeline test can run against an in-process service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the service's current public key (hex text).
    async fn fetch_service_key(&self) -> Result<String, ExchangeError>;

    /// Send an encrypted exchange request; the response is a line-delimited
    /// frame stream.
    async fn open_stream(&self, envelope: &RequestEnvelope) -> Result<ByteStream, ExchangeError>;

    /// Send an encrypted summarization request; the response is one frame.
    async fn summarize(&self, envelope: &RequestEnvelope) -> Result<Frame, ExchangeError>;
}

/// HTTP transport against the remote inference service.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_service_key(&self) -> Result<String, ExchangeError> {
        let resp = self
            .client
            .get(self.url("/pubkey"))
            .timeout(KEY_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExchangeError::Timeout(KEY_FETCH_TIMEOUT)
                } else {
                    ExchangeError::KeyFetch(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(ExchangeError::KeyFetch(format!(
                "key endpoint returned {}",
                resp.status()
            )));
        }

        let key = resp
            .text()
            .await
            .map(|t| t.trim().to_string())
            .map_err(|e| ExchangeError::KeyFetch(e.to_string()))?;
        debug!("fetched service key");
        Ok(key)
    }

    async fn open_stream(&self, envelope: &RequestEnvelope) -> Result<ByteStream, ExchangeError> {
        let resp = self
            .client
            .post(self.url("/chat/stream"))
            .json(envelope)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::from_status(status, body));
        }

        debug!(status = resp.status().as_u16(), "exchange stream opened");
        let stream = resp
            .bytes_stream()
            .map(|item| item.map_err(|e| ExchangeError::Network(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn summarize(&self, envelope: &RequestEnvelope) -> Result<Frame, ExchangeError> {
        let resp = self
            .client
            .post(self.url("/summarize"))
            .json(envelope)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::from_status(status, body));
        }

        resp.json::<Frame>()
            .await
            .map_err(|_| ExchangeError::StreamCorruption("summarize response is not a frame".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let transport = HttpTransport::new("https://api.example.com/");
        assert_eq!(transport.url("/pubkey"), "https://api.example.com/pubkey");
        assert_eq!(
            transport.url("/chat/stream"),
            "https://api.example.com/chat/stream"
        );
    }

    #[test]
    fn timeout_constants() {
        assert_eq!(CONNECT_TIMEOUT, Duration::from_secs(30));
        assert_eq!(KEY_FETCH_TIMEOUT, Duration::from_secs(10));
    }
}
