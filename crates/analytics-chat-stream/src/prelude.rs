//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, AssistantMessage, ChatController, ClientConfig, ConversationId, Notice,
    QueryBody, ResultPayload, SessionCallbacks, SessionEvent, SessionFailure, SessionState,
    SessionStream, StreamEngine, StreamError, StreamRequest, TranscriptEntry,
};
