use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::StreamError;
use crate::message::JoinPrefixes;
use crate::request::{QueryBody, StreamRequest};

const ENV_BASE_URL: &str = "ANALYTICS_CHAT_BASE_URL";
const ENV_STREAM_PATH: &str = "ANALYTICS_CHAT_STREAM_PATH";
const ENV_TIMEOUT_SECS: &str = "ANALYTICS_CHAT_TIMEOUT_SECS";
const ENV_AUTH_TOKEN: &str = "ANALYTICS_CHAT_AUTH_TOKEN";
const ENV_JOIN_PREFIXES: &str = "ANALYTICS_CHAT_JOIN_PREFIXES";

/// Configuration for the streaming client.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClientConfig {
    /// Backend origin, for example `https://analytics.example.com`.
    pub base_url: String,
    /// Path of the streaming chat endpoint.
    pub stream_path: String,
    /// Optional whole-request timeout; none by default since answers can
    /// stream for minutes.
    pub timeout: Option<Duration>,
    /// Headers attached to every request.
    pub default_headers: BTreeMap<String, String>,
    /// Response header carrying the resolved conversation id.
    pub conversation_header: String,
    /// Response header carrying the id of the user's message.
    pub user_message_header: String,
    /// Length cap for titles of newly created conversations.
    pub title_max_chars: usize,
    /// Bounded event buffer between the session task and its consumer.
    pub stream_buffer_capacity: usize,
    /// Identifier prefixes for the text join heuristic.
    pub join_prefixes: JoinPrefixes,
}

impl ClientConfig {
    /// Creates a config with defaults for everything but the backend origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            stream_path: "/api/chat/stream".to_string(),
            timeout: None,
            default_headers: BTreeMap::new(),
            conversation_header: "x-conversation-id".to_string(),
            user_message_header: "x-user-message-id".to_string(),
            title_max_chars: 80,
            stream_buffer_capacity: 128,
            join_prefixes: JoinPrefixes::default(),
        }
    }

    /// Builds a config from `ANALYTICS_CHAT_BASE_URL` and the optional
    /// `ANALYTICS_CHAT_*` overrides.
    pub fn from_env() -> Result<Self, StreamError> {
        let base_url = env_var(ENV_BASE_URL).ok_or_else(|| {
            StreamError::Config(format!("missing {ENV_BASE_URL} for the analytics backend"))
        })?;
        Self::new(base_url).apply_env()
    }

    /// Applies the optional `ANALYTICS_CHAT_*` overrides to this config.
    pub fn apply_env(mut self) -> Result<Self, StreamError> {
        if let Some(path) = env_var(ENV_STREAM_PATH) {
            self.stream_path = path;
        }
        if let Some(raw) = env_var(ENV_TIMEOUT_SECS) {
            let secs = raw.parse::<u64>().map_err(|e| {
                StreamError::Config(format!("invalid {ENV_TIMEOUT_SECS} value {raw:?}: {e}"))
            })?;
            self.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(token) = env_var(ENV_AUTH_TOKEN) {
            self = self.bearer_token(token);
        }
        if let Some(raw) = env_var(ENV_JOIN_PREFIXES) {
            self.join_prefixes = JoinPrefixes::from_csv(&raw);
        }
        Ok(self)
    }

    /// Overrides the endpoint path.
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Sets a whole-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Sends `authorization: Bearer <token>` with every request.
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.default_header("authorization", value)
    }

    /// Overrides the identifier prefix table.
    pub fn join_prefixes(mut self, prefixes: JoinPrefixes) -> Self {
        self.join_prefixes = prefixes;
        self
    }

    /// Overrides the conversation title length cap.
    pub fn title_max_chars(mut self, max_chars: usize) -> Self {
        self.title_max_chars = max_chars;
        self
    }

    /// Checks values the engine relies on.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.base_url.trim().is_empty() {
            return Err(StreamError::Config("base_url must not be empty".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(StreamError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.conversation_header.trim().is_empty() || self.user_message_header.trim().is_empty()
        {
            return Err(StreamError::Config(
                "metadata header names must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Full URL of the streaming endpoint.
    pub fn stream_url(&self) -> String {
        let path = self.stream_path.trim_start_matches('/');
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    /// Builds a request for `body` carrying the default headers.
    pub fn request(&self, body: QueryBody) -> StreamRequest {
        self.default_headers.iter().fold(
            StreamRequest::new(self.stream_url(), body),
            |request, (name, value)| request.header(name.clone(), value.clone()),
        )
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ConversationId;

    #[test]
    fn defaults_match_the_backend_contract() {
        let config = ClientConfig::new("http://localhost:8000/");
        assert_eq!(config.stream_url(), "http://localhost:8000/api/chat/stream");
        assert_eq!(config.conversation_header, "x-conversation-id");
        assert_eq!(config.user_message_header, "x-user-message-id");
        assert_eq!(config.title_max_chars, 80);
        assert!(config.timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn requests_carry_default_headers_and_body() {
        let config = ClientConfig::new("http://localhost:8000")
            .stream_path("v2/stream")
            .bearer_token("secret");
        let request = config.request(QueryBody::new("q", Some(ConversationId::new("c"))));
        assert_eq!(request.url, "http://localhost:8000/v2/stream");
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );
        assert_eq!(request.conversation_id(), Some(&ConversationId::new("c")));
    }

    #[test]
    fn zero_buffer_capacity_is_rejected() {
        let mut config = ClientConfig::new("http://localhost:8000");
        config.stream_buffer_capacity = 0;
        assert!(matches!(config.validate(), Err(StreamError::Config(_))));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ClientConfig::new("http://localhost:8000").timeout(Duration::from_secs(5));
        let value = serde_json::to_value(&config).expect("serialize");
        let back: ClientConfig = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, config);
    }
}
