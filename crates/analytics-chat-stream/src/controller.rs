//! Conversation-facing glue: applies session events to the displayed
//! conversation only while the session is bound to it.

use tracing::debug;

use crate::binding::ConversationBinding;
use crate::config::ClientConfig;
use crate::errors::{SessionFailure, StreamError};
use crate::message::{AssistantMessage, MessageAggregator};
use crate::request::{ConversationId, MessageId, QueryBody};
use crate::session::{
    ResponseMetadata, SessionCallbacks, SessionEvent, SessionState, SessionStream, StreamEngine,
};

/// One entry of the displayed transcript.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TranscriptEntry {
    User {
        id: Option<MessageId>,
        text: String,
    },
    Assistant(AssistantMessage),
}

/// What the user currently sees.
#[derive(Clone, Debug, Default)]
pub struct ConversationView {
    displayed: Option<ConversationId>,
    transcript: Vec<TranscriptEntry>,
    last_error: Option<SessionFailure>,
}

/// Drives one engine on behalf of a single conversation view.
pub struct ChatController {
    engine: StreamEngine,
    config: ClientConfig,
    view: ConversationView,
    binding: Option<ConversationBinding>,
    in_flight: Option<MessageAggregator>,
    active_request: Option<uuid::Uuid>,
}

impl ChatController {
    pub fn new(engine: StreamEngine, config: ClientConfig) -> Self {
        Self {
            engine,
            config,
            view: ConversationView::default(),
            binding: None,
            in_flight: None,
            active_request: None,
        }
    }

    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    pub fn displayed(&self) -> Option<&ConversationId> {
        self.view.displayed.as_ref()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.view.transcript
    }

    /// Message being streamed, if any frame produced one yet.
    pub fn in_flight(&self) -> Option<&AssistantMessage> {
        self.in_flight.as_ref().map(MessageAggregator::message)
    }

    pub fn last_error(&self) -> Option<&SessionFailure> {
        self.view.last_error.as_ref()
    }

    /// Sends `query` against the displayed conversation, superseding any
    /// session still streaming.
    pub fn submit(&mut self, query: &str) -> Result<SessionStream, StreamError> {
        let started = self.view.displayed.clone();
        let request = self.config.request(QueryBody::new(query, started.clone()));
        let stream = self.engine.start(request)?;

        self.settle();
        self.view.last_error = None;
        self.view.transcript.push(TranscriptEntry::User {
            id: None,
            text: query.to_string(),
        });
        self.binding = Some(ConversationBinding::new(started));
        self.active_request = Some(stream.request_id());
        Ok(stream)
    }

    /// Switches the displayed conversation. History loading is up to the
    /// caller; the transcript starts empty.
    pub fn navigate(&mut self, conversation: Option<ConversationId>) {
        debug!(
            event = "chat.navigate",
            domain = "chat",
            from = ?self.view.displayed,
            to = ?conversation
        );
        self.view.displayed = conversation;
        self.view.transcript.clear();
        self.view.last_error = None;
    }

    /// Stops the active session. The partial message is kept if it belongs
    /// to the displayed conversation.
    pub fn stop(&mut self) -> bool {
        let stopped = self.engine.stop();
        self.settle();
        self.active_request = None;
        stopped
    }

    /// Applies one event of the active session. Returns true if the view or
    /// the in-flight message changed.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Metadata(metadata) => return self.bind(metadata),
            // Terminal events finalize even off screen; `settle` decides
            // whether the message is shown.
            SessionEvent::Done(_) => return self.settle(),
            SessionEvent::Error { error } => {
                if self.is_visible() {
                    self.view.last_error = Some(error.clone());
                }
                return self.settle();
            }
            _ => {}
        }
        let Some(binding) = &self.binding else {
            return false;
        };
        if !binding.may_mutate(self.view.displayed.as_ref()) {
            debug!(
                event = "chat.frame_ignored",
                domain = "chat",
                bound_to = ?binding.target(),
                displayed = ?self.view.displayed
            );
            return false;
        }

        match event {
            SessionEvent::Status { text } => self.aggregator().set_status(text),
            SessionEvent::Chunk { text } => self.aggregator().append(text),
            SessionEvent::KvResults { payload } => self.aggregator().push_result(payload.clone()),
            SessionEvent::Metadata(_) | SessionEvent::Done(_) | SessionEvent::Error { .. } => false,
        }
    }

    /// Consumes `stream`, applying its events and forwarding every event to
    /// `observer`. Returns the session's final state.
    pub async fn run<C: SessionCallbacks + ?Sized>(
        &mut self,
        mut stream: SessionStream,
        observer: &mut C,
    ) -> SessionState {
        let request_id = stream.request_id();
        while let Some(event) = stream.next_event().await {
            if self.active_request == Some(request_id) {
                self.apply(&event);
            }
            event.dispatch_to(observer);
        }
        let state = stream.wait_terminal().await;

        // Cancelled through the engine or an abort handle: no terminal event
        // arrived, so the partial message is settled here.
        if self.active_request == Some(request_id) {
            self.settle();
            self.active_request = None;
        }
        state
    }

    fn bind(&mut self, metadata: &ResponseMetadata) -> bool {
        let Some(binding) = self.binding.as_mut() else {
            return false;
        };
        let mut changed = false;
        if let Some(id) = &metadata.conversation_id
            && binding.resolve(id.clone())
        {
            if binding.started().is_none() && self.view.displayed.is_none() {
                debug!(event = "chat.conversation_adopted", domain = "chat", conversation_id = %id);
                self.view.displayed = Some(id.clone());
                changed = true;
            }
            if let Some(aggregator) = self.in_flight.as_mut() {
                aggregator.set_conversation(id.clone());
            }
        }

        if let Some(message_id) = &metadata.user_message_id
            && binding.may_mutate(self.view.displayed.as_ref())
            && let Some(TranscriptEntry::User { id, .. }) = self
                .view
                .transcript
                .iter_mut()
                .rev()
                .find(|entry| matches!(entry, TranscriptEntry::User { .. }))
        {
            *id = Some(message_id.clone());
            changed = true;
        }
        changed
    }

    fn aggregator(&mut self) -> &mut MessageAggregator {
        let conversation = self.binding.as_ref().and_then(|b| b.target().cloned());
        let prefixes = &self.config.join_prefixes;
        self.in_flight
            .get_or_insert_with(|| MessageAggregator::new(conversation, prefixes.clone()))
    }

    fn is_visible(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| b.may_mutate(self.view.displayed.as_ref()))
    }

    /// Finalizes the in-flight message, keeping it only when it belongs on
    /// screen. Returns true if the transcript changed.
    fn settle(&mut self) -> bool {
        let Some(mut aggregator) = self.in_flight.take() else {
            return false;
        };
        aggregator.finalize();
        let visible = self.is_visible();
        if visible {
            self.view
                .transcript
                .push(TranscriptEntry::Assistant(aggregator.into_message()));
        } else {
            debug!(event = "chat.message_dropped", domain = "chat");
        }
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Script, ScriptedTransport};

    fn controller(scripts: Vec<Script>) -> ChatController {
        let config = ClientConfig::new("http://test.local");
        let engine =
            StreamEngine::new(ScriptedTransport::new(scripts), &config).expect("engine");
        ChatController::new(engine, config)
    }

    fn id(value: &str) -> ConversationId {
        ConversationId::new(value)
    }

    fn chunk(text: &str) -> SessionEvent {
        SessionEvent::Chunk { text: text.into() }
    }

    fn assistant(entry: &TranscriptEntry) -> &AssistantMessage {
        match entry {
            TranscriptEntry::Assistant(message) => message,
            other => panic!("expected assistant entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_conversation_is_adopted_and_rendered() {
        let mut chat = controller(vec![Script::body(
            &[("x-conversation-id", "c-new"), ("x-user-message-id", "m-7")],
            &["status: Planning\ndata: Hello\ndata: world\n[DONE]\n"],
        )]);
        let stream = chat.submit("Say hello").expect("submit");
        let state = chat.run(stream, &mut ()).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(chat.displayed(), Some(&id("c-new")));
        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(
            transcript[0],
            TranscriptEntry::User {
                id: Some(MessageId::new("m-7")),
                text: "Say hello".into()
            }
        );
        let reply = assistant(&transcript[1]);
        assert_eq!(reply.content, "Hello world");
        assert_eq!(reply.conversation_id, Some(id("c-new")));
        assert!(!reply.streaming);
        assert_eq!(reply.status_text, "");
        assert!(chat.in_flight().is_none());
    }

    #[tokio::test]
    async fn navigating_away_before_the_id_arrives_keeps_frames_off_screen() {
        let mut chat = controller(vec![Script::Pending]);
        let _stream = chat.submit("New question").expect("submit");
        chat.navigate(Some(id("x")));

        let metadata = ResponseMetadata {
            conversation_id: Some(id("c-new")),
            user_message_id: None,
        };
        chat.apply(&SessionEvent::Metadata(metadata.clone()));
        assert_eq!(chat.displayed(), Some(&id("x")));
        assert!(!chat.apply(&chunk("hidden")));
        assert!(!chat.apply(&SessionEvent::Done(metadata)));
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn completion_off_screen_still_finalizes_the_message() {
        let mut chat = controller(vec![Script::Pending]);
        chat.navigate(Some(id("x")));
        let _stream = chat.submit("Question").expect("submit");
        chat.apply(&SessionEvent::Status {
            text: "Working".into(),
        });
        chat.apply(&chunk("partial"));

        chat.navigate(Some(id("y")));
        assert!(!chat.apply(&SessionEvent::Done(ResponseMetadata::default())));
        assert!(chat.in_flight().is_none());

        chat.navigate(Some(id("x")));
        assert!(chat.in_flight().is_none());
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn failure_off_screen_finalizes_without_touching_the_view() {
        let mut chat = controller(vec![Script::Pending]);
        chat.navigate(Some(id("x")));
        let _stream = chat.submit("Question").expect("submit");
        chat.apply(&chunk("partial"));

        chat.navigate(Some(id("y")));
        chat.apply(&SessionEvent::Error {
            error: SessionFailure::Transport {
                message: "reset".into(),
            },
        });
        assert!(chat.in_flight().is_none());
        assert!(chat.last_error().is_none());
    }

    #[tokio::test]
    async fn cancellation_through_the_engine_settles_the_partial_message() {
        struct StopAfterFirstChunk(StreamEngine);

        impl SessionCallbacks for StopAfterFirstChunk {
            fn on_chunk(&mut self, _text: &str) {
                self.0.stop();
            }
        }

        let mut chat = controller(vec![Script::Body {
            status: 200,
            headers: Vec::new(),
            chunks: vec![Ok("data: half\n")],
            then_pending: true,
        }]);
        let stream = chat.submit("Question").expect("submit");
        let mut observer = StopAfterFirstChunk(chat.engine().clone());

        let state = chat.run(stream, &mut observer).await;
        assert_eq!(state, SessionState::Cancelled);
        assert!(chat.in_flight().is_none());
        let reply = assistant(chat.transcript().last().expect("reply"));
        assert_eq!(reply.content, "half");
        assert!(!reply.streaming);
    }

    #[tokio::test]
    async fn frames_resume_after_navigating_back() {
        let mut chat = controller(vec![Script::Pending]);
        chat.navigate(Some(id("x")));
        let _stream = chat.submit("Question").expect("submit");

        assert!(chat.apply(&chunk("one")));
        chat.navigate(Some(id("y")));
        assert!(!chat.apply(&chunk("two")));
        chat.navigate(Some(id("x")));
        assert!(chat.apply(&chunk("three")));
        assert!(chat.apply(&SessionEvent::Done(ResponseMetadata::default())));

        let reply = assistant(chat.transcript().last().expect("reply"));
        assert_eq!(reply.content, "one three");
    }

    #[tokio::test]
    async fn status_replaces_and_clears_on_completion() {
        let mut chat = controller(vec![Script::Pending]);
        let _stream = chat.submit("Question").expect("submit");

        chat.apply(&SessionEvent::Status {
            text: "Planning".into(),
        });
        chat.apply(&SessionEvent::Status {
            text: "Running query".into(),
        });
        let in_flight = chat.in_flight().expect("in flight");
        assert_eq!(in_flight.status_text, "Running query");
        assert_eq!(in_flight.content, "");

        chat.apply(&chunk("Answer"));
        chat.apply(&SessionEvent::Done(ResponseMetadata::default()));
        let reply = assistant(chat.transcript().last().expect("reply"));
        assert_eq!(reply.status_text, "");
        assert_eq!(reply.content, "Answer");
    }

    #[tokio::test]
    async fn error_keeps_partial_text_and_records_the_failure() {
        let mut chat = controller(vec![Script::Pending]);
        let _stream = chat.submit("Question").expect("submit");
        chat.apply(&chunk("partial"));
        chat.apply(&SessionEvent::Error {
            error: SessionFailure::Transport {
                message: "reset".into(),
            },
        });

        assert!(matches!(
            chat.last_error(),
            Some(SessionFailure::Transport { .. })
        ));
        let reply = assistant(chat.transcript().last().expect("reply"));
        assert_eq!(reply.content, "partial");
        assert!(!reply.streaming);
    }

    #[tokio::test]
    async fn stop_finalizes_the_partial_message() {
        let mut chat = controller(vec![Script::Pending]);
        let _stream = chat.submit("Question").expect("submit");
        chat.apply(&chunk("half an"));
        chat.apply(&chunk("answer"));

        assert!(chat.stop());
        assert!(!chat.engine().is_streaming());
        let reply = assistant(chat.transcript().last().expect("reply"));
        assert_eq!(reply.content, "half an answer");
        assert!(chat.in_flight().is_none());
        assert!(chat.last_error().is_none());
    }

    #[tokio::test]
    async fn stale_stream_events_are_not_applied() {
        // The first session is superseded before it reaches the transport.
        let mut chat = controller(vec![Script::body(&[], &["data: fresh\n[DONE]\n"])]);
        let first = chat.submit("first").expect("submit first");
        let second = chat.submit("second").expect("submit second");

        assert_eq!(chat.run(first, &mut ()).await, SessionState::Cancelled);
        assert_eq!(chat.run(second, &mut ()).await, SessionState::Completed);
        let contents: Vec<&str> = chat
            .transcript()
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Assistant(message) => Some(message.content.as_str()),
                TranscriptEntry::User { .. } => None,
            })
            .collect();
        assert_eq!(contents, vec!["fresh"]);
    }
}
