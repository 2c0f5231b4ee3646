use std::collections::BTreeMap;
use std::fmt;

use crate::errors::StreamError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Server-assigned conversation identifier.
    ConversationId
);
string_id!(
    /// Identifier of a user or assistant message.
    MessageId
);

/// JSON body posted to the streaming endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueryBody {
    /// Free-text question typed by the user.
    pub query: String,
    /// Existing conversation to continue; absent means "create a new one".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

impl QueryBody {
    pub fn new(query: impl Into<String>, conversation_id: Option<ConversationId>) -> Self {
        Self {
            query: query.into(),
            conversation_id,
        }
    }
}

/// One outbound streaming request.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Client-side id used to correlate logs and session handles.
    pub request_id: uuid::Uuid,
    pub url: String,
    pub method: reqwest::Method,
    /// Extra headers, sent as-is. Credentials are the transport's concern.
    pub headers: BTreeMap<String, String>,
    pub body: QueryBody,
}

impl StreamRequest {
    /// Creates a `POST` request with a fresh request id.
    pub fn new(url: impl Into<String>, body: QueryBody) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4(),
            url: url.into(),
            method: reqwest::Method::POST,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Conversation the request continues, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.body.conversation_id.as_ref()
    }

    pub fn query(&self) -> &str {
        &self.body.query
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if self.url.trim().is_empty() {
            return Err(StreamError::Validation("request url must not be empty".into()));
        }
        if self.body.query.trim().is_empty() {
            return Err(StreamError::Validation("query must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_conversation_body_omits_conversation_id() {
        let body = QueryBody::new("top pools by stake", None);
        assert_eq!(
            serde_json::to_value(&body).expect("serialize"),
            serde_json::json!({"query": "top pools by stake"})
        );
    }

    #[test]
    fn existing_conversation_body_carries_id() {
        let body = QueryBody::new("and last epoch?", Some(ConversationId::new("c-42")));
        assert_eq!(
            serde_json::to_value(&body).expect("serialize"),
            serde_json::json!({"query": "and last epoch?", "conversation_id": "c-42"})
        );
    }

    #[test]
    fn requests_are_posts_with_unique_ids() {
        let a = StreamRequest::new("http://localhost/stream", QueryBody::new("q", None));
        let b = StreamRequest::new("http://localhost/stream", QueryBody::new("q", None));
        assert_eq!(a.method, reqwest::Method::POST);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn validation_rejects_blank_query() {
        let request = StreamRequest::new("http://localhost/stream", QueryBody::new("  ", None));
        assert!(matches!(
            request.validate(),
            Err(StreamError::Validation(msg)) if msg.contains("query")
        ));
    }
}
