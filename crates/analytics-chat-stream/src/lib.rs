//! Streaming client for the analytics chat assistant.
//!
//! The backend answers a query with a line-oriented text stream that mixes
//! status lines, answer fragments and JSON result blocks. This crate decodes
//! that stream, owns at most one live session at a time, keeps late frames
//! away from conversations the user navigated away from, and assembles the
//! fragments into a finished markdown message.
//!
//! # Usage
//!
//! ```no_run
//! use analytics_chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let config = ClientConfig::new("http://localhost:8000");
//! let engine = StreamEngine::from_config(&config)?;
//! let mut chat = ChatController::new(engine, config);
//!
//! let stream = chat.submit("Which pools grew most last epoch?")?;
//! let state = chat.run(stream, &mut ()).await;
//!
//! if let Some(TranscriptEntry::Assistant(reply)) = chat.transcript().last() {
//!     println!("{state:?}: {}", reply.content);
//! }
//! # Ok(())
//! # }
//! ```

/// Conversation binding guard.
pub mod binding;
/// Client configuration and environment overrides.
pub mod config;
/// Conversation view driven by session events.
pub mod controller;
/// Public error types.
pub mod errors;
/// Incremental decoding of the line protocol into frames.
pub mod frame;
/// Message aggregation, the text join heuristic and markdown finalization.
pub mod message;
/// Notices for sidebar and navigation collaborators.
pub mod notice;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Request identifiers and body.
pub mod request;
/// Result block assembly and parsing.
pub mod result_block;
/// Session engine, events and cancellation.
pub mod session;
/// Replaceable status line of a streaming message.
pub mod status;
/// Transport contract and the reqwest implementation.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use binding::ConversationBinding;
pub use config::ClientConfig;
pub use controller::{ChatController, ConversationView, TranscriptEntry};
pub use errors::{ResultBlockError, SessionFailure, StreamError};
pub use frame::{Frame, FrameDecoder};
pub use message::{
    AssistantMessage, JoinPrefixes, MessageAggregator, finalize_markdown, smart_append,
};
pub use notice::{ConversationSummary, Notice};
pub use observability::init_observability;
pub use request::{ConversationId, MessageId, QueryBody, StreamRequest};
pub use result_block::{ResultBlockAssembler, ResultPayload, parse_result_block};
pub use session::{
    AbortHandle, ResponseMetadata, SessionCallbacks, SessionEvent, SessionState, SessionStream,
    StreamEngine, StreamSession,
};
pub use status::StatusProjector;
pub use transport::{ReqwestTransport, ResponseBody, StreamTransport, TransportResponse};
