use std::collections::BTreeMap;
use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::StreamError;
use crate::request::StreamRequest;

/// Raw response body chunks in arrival order.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Response body as handed over by a transport.
pub enum ResponseBody {
    /// Incrementally readable body.
    Streaming(ByteStream),
    /// Body from a backend that does not stream; consumed as one text chunk.
    Buffered(String),
}

/// Response head plus body, before any body byte is consumed.
pub struct TransportResponse {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Opaque request function used by the session engine.
///
/// Implementations own everything about getting the request to the backend,
/// including credentials.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    async fn send(&self, request: &StreamRequest) -> Result<TransportResponse, StreamError>;
}

/// Default transport built on reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the underlying client; a timeout is applied only when configured.
    pub fn new(config: &ClientConfig) -> Result<Self, StreamError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl StreamTransport for ReqwestTransport {
    async fn send(&self, request: &StreamRequest) -> Result<TransportResponse, StreamError> {
        debug!(
            event = "stream.http_request",
            domain = "stream",
            request_id = %request.request_id,
            has_conversation = request.conversation_id().is_some(),
            "sending stream request"
        );
        let mut http_req = self
            .client
            .request(request.method.clone(), &request.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body);
        for (name, value) in &request.headers {
            http_req = http_req.header(name.as_str(), value.as_str());
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("stream request failed: {e}")))?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        let buffered = headers
            .get("content-type")
            .is_some_and(|kind| kind.starts_with("application/json"));
        let body = if buffered && response.status().is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| StreamError::transport(format!("failed to read response body: {e}")))?;
            ResponseBody::Buffered(text)
        } else {
            let stream = response.bytes_stream().map(|chunk| {
                chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}")))
            });
            ResponseBody::Streaming(Box::pin(stream))
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_headers(status: u16, headers: &[(&str, &str)]) -> TransportResponse {
        TransportResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: ResponseBody::Buffered(String::new()),
        }
    }

    #[test]
    fn header_lookup_ignores_case() {
        let response = response_with_headers(200, &[("x-conversation-id", "c-1")]);
        assert_eq!(response.header("X-Conversation-Id"), Some("c-1"));
        assert_eq!(response.header("x-user-message-id"), None);
    }

    #[test]
    fn only_2xx_is_success() {
        assert!(response_with_headers(200, &[]).is_success());
        assert!(response_with_headers(204, &[]).is_success());
        assert!(!response_with_headers(401, &[]).is_success());
        assert!(!response_with_headers(500, &[]).is_success());
    }

    #[test]
    fn client_builds_from_default_config() {
        let config = ClientConfig::new("http://localhost:8000");
        assert!(ReqwestTransport::new(&config).is_ok());
    }
}
