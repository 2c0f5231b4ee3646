//! Cross-component notices for sidebar and navigation collaborators.
//!
//! The engine owns one broadcast channel; collaborators subscribe through
//! `StreamEngine::subscribe`. Nothing here is global.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::request::ConversationId;

/// Sidebar entry for a conversation the backend just created.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub just_created: bool,
}

/// Notice published by the session engine.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// First disclosure of a conversation id for a request that had none.
    ConversationCreated(ConversationSummary),
    /// A session completed against this conversation; used for recency ordering.
    ConversationTouched {
        id: ConversationId,
        timestamp: DateTime<Utc>,
    },
    StreamStarted {
        conversation_id: Option<ConversationId>,
    },
    StreamEnded {
        conversation_id: Option<ConversationId>,
    },
}

/// Derives a sidebar title from the user's query.
pub fn conversation_title(query: &str, max_chars: usize) -> String {
    query.trim().chars().take(max_chars).collect()
}

#[derive(Clone)]
pub(crate) struct NoticeBus {
    tx: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            trace!(event = "stream.notice_unobserved", domain = "stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_trimmed_and_truncated_by_characters() {
        assert_eq!(conversation_title("  hello  ", 80), "hello");
        let long = "é".repeat(100);
        assert_eq!(conversation_title(&long, 80).chars().count(), 80);
    }

    #[test]
    fn published_notices_reach_every_subscriber() {
        let bus = NoticeBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Notice::StreamStarted {
            conversation_id: None,
        });
        assert_eq!(
            a.try_recv().expect("a"),
            Notice::StreamStarted {
                conversation_id: None
            }
        );
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        NoticeBus::new(1).publish(Notice::StreamEnded {
            conversation_id: Some(ConversationId::new("c")),
        });
    }

    #[test]
    fn notices_serialize_with_a_type_tag() {
        let value = serde_json::to_value(Notice::StreamEnded {
            conversation_id: Some(ConversationId::new("c-1")),
        })
        .expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"type": "stream_ended", "conversation_id": "c-1"})
        );
    }
}
