//! Session engine: one owned streaming exchange at a time.
//!
//! `StreamEngine::start` spawns a task that issues the request, reads the
//! out-of-band metadata headers, decodes the body into frames and forwards
//! them as [`SessionEvent`]s. Starting another session, or calling
//! `StreamEngine::stop`, aborts the owned one and bumps a generation counter;
//! both the task and the consumer-side [`SessionStream`] check that counter,
//! so a replaced session never delivers another event.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::StreamExt as _;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::{SessionFailure, StreamError};
use crate::frame::{Frame, FrameDecoder};
use crate::notice::{ConversationSummary, Notice, NoticeBus, conversation_title};
use crate::request::{ConversationId, MessageId, StreamRequest};
use crate::result_block::{ResultBlockAssembler, ResultPayload};
use crate::transport::{
    ByteStream, ReqwestTransport, ResponseBody, StreamTransport, TransportResponse,
};

const NOTICE_CAPACITY: usize = 64;

/// Lifecycle of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn can_become(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Streaming)
                | (Starting | Streaming, Completed | Cancelled | Failed)
        )
    }
}

/// Identifiers disclosed by the backend for a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseMetadata {
    pub conversation_id: Option<ConversationId>,
    pub user_message_id: Option<MessageId>,
}

/// Events delivered to the consumer of a session, in decode order.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Replacement status line.
    Status { text: String },
    /// Text fragment for the assistant message.
    Chunk { text: String },
    /// One successfully parsed result block.
    KvResults { payload: ResultPayload },
    /// Response headers disclosed conversation or message ids.
    Metadata(ResponseMetadata),
    /// Terminal success; sent exactly once.
    Done(ResponseMetadata),
    /// Terminal failure; sent at most once and never after `Done`.
    Error { error: SessionFailure },
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }

    /// Forwards this event to the matching callback.
    pub fn dispatch_to<C: SessionCallbacks + ?Sized>(&self, callbacks: &mut C) {
        match self {
            Self::Status { text } => callbacks.on_status(text),
            Self::Chunk { text } => callbacks.on_chunk(text),
            Self::KvResults { payload } => callbacks.on_kv_results(payload),
            Self::Metadata(metadata) => callbacks.on_metadata(metadata),
            Self::Done(metadata) => callbacks.on_done(metadata),
            Self::Error { error } => callbacks.on_error(error),
        }
    }
}

/// Handler-style view of [`SessionEvent`]s. Every method defaults to a no-op.
pub trait SessionCallbacks {
    fn on_status(&mut self, _text: &str) {}
    fn on_chunk(&mut self, _text: &str) {}
    fn on_kv_results(&mut self, _payload: &ResultPayload) {}
    fn on_metadata(&mut self, _metadata: &ResponseMetadata) {}
    fn on_done(&mut self, _metadata: &ResponseMetadata) {}
    fn on_error(&mut self, _error: &SessionFailure) {}
}

impl SessionCallbacks for () {}

/// Handle used to cancel one session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The transport is abandoned cooperatively; the consumer stops seeing
    /// events immediately and no error is reported.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Identity and lifecycle bookkeeping for one request/response exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSession {
    request_id: uuid::Uuid,
    started_conversation_id: Option<ConversationId>,
    resolved_conversation_id: Option<ConversationId>,
    user_message_id: Option<MessageId>,
    state: SessionState,
}

impl StreamSession {
    pub fn new(request: &StreamRequest) -> Self {
        Self {
            request_id: request.request_id,
            started_conversation_id: request.conversation_id().cloned(),
            resolved_conversation_id: None,
            user_message_id: None,
            state: SessionState::Idle,
        }
    }

    pub fn request_id(&self) -> uuid::Uuid {
        self.request_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_conversation_id(&self) -> Option<&ConversationId> {
        self.started_conversation_id.as_ref()
    }

    pub fn resolved_conversation_id(&self) -> Option<&ConversationId> {
        self.resolved_conversation_id.as_ref()
    }

    /// Resolved id if known, else the one the request started with.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.resolved_conversation_id
            .as_ref()
            .or(self.started_conversation_id.as_ref())
    }

    /// Sets the resolved conversation id. Write-once.
    pub fn resolve(&mut self, id: ConversationId) -> bool {
        if self.resolved_conversation_id.is_some() {
            return false;
        }
        self.resolved_conversation_id = Some(id);
        true
    }

    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            conversation_id: self.conversation_id().cloned(),
            user_message_id: self.user_message_id.clone(),
        }
    }

    /// Moves to `next` if the lifecycle allows it. Terminal states are final.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_become(next) {
            debug!(
                event = "stream.state_rejected",
                domain = "stream",
                request_id = %self.request_id,
                from = ?self.state,
                to = ?next
            );
            return false;
        }
        self.state = next;
        true
    }
}

#[derive(Clone, Debug)]
struct SessionOptions {
    conversation_header: String,
    user_message_header: String,
    title_max_chars: usize,
    stream_buffer_capacity: usize,
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            conversation_header: config.conversation_header.clone(),
            user_message_header: config.user_message_header.clone(),
            title_max_chars: config.title_max_chars,
            stream_buffer_capacity: config.stream_buffer_capacity,
        }
    }
}

struct OwnedSession {
    generation: u64,
    request_id: uuid::Uuid,
    conversation_id: Option<ConversationId>,
    abort: AbortHandle,
}

struct EngineInner {
    transport: Arc<dyn StreamTransport>,
    options: SessionOptions,
    generation: Arc<AtomicU64>,
    owned: Mutex<Option<OwnedSession>>,
    notices: NoticeBus,
}

impl EngineInner {
    /// Drops ownership if `generation` is still the owned session.
    fn release(&self, generation: u64) -> bool {
        let mut owned = self.owned.lock();
        if owned.as_ref().is_some_and(|s| s.generation == generation) {
            *owned = None;
            return true;
        }
        false
    }

    fn record_conversation(&self, generation: u64, id: &ConversationId) {
        if let Some(owned) = self.owned.lock().as_mut()
            && owned.generation == generation
        {
            owned.conversation_id = Some(id.clone());
        }
    }
}

/// Owner of at most one streaming session.
#[derive(Clone)]
pub struct StreamEngine {
    inner: Arc<EngineInner>,
}

impl StreamEngine {
    /// Creates an engine around any transport.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        config: &ClientConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                transport,
                options: SessionOptions::from(config),
                generation: Arc::new(AtomicU64::new(0)),
                owned: Mutex::new(None),
                notices: NoticeBus::new(NOTICE_CAPACITY),
            }),
        })
    }

    /// Creates an engine backed by [`ReqwestTransport`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, StreamError> {
        let transport = ReqwestTransport::new(config)?;
        Self::new(Arc::new(transport), config)
    }

    /// Subscribes to created/touched/stream notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Returns true while a session is owned.
    pub fn is_streaming(&self) -> bool {
        self.inner.owned.lock().is_some()
    }

    pub fn current_request_id(&self) -> Option<uuid::Uuid> {
        self.inner.owned.lock().as_ref().map(|s| s.request_id)
    }

    /// Starts a session, silently superseding the one currently owned.
    ///
    /// Must be called from within a Tokio runtime. Fails only for invalid
    /// requests; everything that goes wrong later is reported through the
    /// returned stream.
    pub fn start(&self, request: StreamRequest) -> Result<SessionStream, StreamError> {
        request.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            StreamError::Config("stream sessions require a running Tokio runtime".into())
        })?;

        let (tx, rx) = mpsc::channel(self.inner.options.stream_buffer_capacity);
        let (abort_tx, abort_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let abort = AbortHandle { tx: abort_tx };
        let request_id = request.request_id;

        let (generation, superseded) = {
            let mut owned = self.inner.owned.lock();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = owned.replace(OwnedSession {
                generation,
                request_id,
                conversation_id: request.conversation_id().cloned(),
                abort: abort.clone(),
            });
            (generation, previous)
        };
        if let Some(previous) = superseded {
            self.cancel(previous, "superseded");
        }

        info!(
            event = "stream.session_started",
            domain = "stream",
            request_id = %request_id,
            generation,
            has_conversation = request.conversation_id().is_some()
        );
        let task = SessionTask {
            engine: self.inner.clone(),
            session: StreamSession::new(&request),
            request,
            gate: EventGate {
                generation,
                live: self.inner.generation.clone(),
                tx,
            },
            state_tx,
            abort_rx,
        };
        runtime.spawn(task.run());

        Ok(SessionStream {
            request_id,
            generation,
            live: self.inner.generation.clone(),
            rx,
            state_rx,
            abort_handle: abort,
            saw_terminal: false,
        })
    }

    /// Aborts the owned session, if any. The aborted session emits nothing
    /// further, not even an error.
    pub fn stop(&self) -> bool {
        let previous = {
            let mut owned = self.inner.owned.lock();
            let previous = owned.take();
            if previous.is_some() {
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
            }
            previous
        };
        match previous {
            Some(previous) => {
                self.cancel(previous, "stopped");
                true
            }
            None => false,
        }
    }

    fn cancel(&self, session: OwnedSession, reason: &'static str) {
        session.abort.abort();
        debug!(
            event = "stream.session_cancelled",
            domain = "stream",
            request_id = %session.request_id,
            generation = session.generation,
            reason
        );
        self.inner.notices.publish(Notice::StreamEnded {
            conversation_id: session.conversation_id,
        });
    }
}

/// Consumer side of one session.
pub struct SessionStream {
    request_id: uuid::Uuid,
    generation: u64,
    live: Arc<AtomicU64>,
    rx: mpsc::Receiver<SessionEvent>,
    state_rx: watch::Receiver<SessionState>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl SessionStream {
    pub fn request_id(&self) -> uuid::Uuid {
        self.request_id
    }

    /// Returns a handle that cancels this session.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Latest state published by the session task.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// True once another session was started or the engine was stopped.
    pub fn is_superseded(&self) -> bool {
        self.live.load(Ordering::SeqCst) != self.generation
    }

    fn is_silenced(&self) -> bool {
        self.is_superseded() || self.abort_handle.is_aborted()
    }

    /// Waits for the next event.
    ///
    /// Returns `None` after the terminal event, or as soon as the session was
    /// superseded or aborted, even if events are still queued.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.saw_terminal || self.is_silenced() {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.is_silenced() {
            return None;
        }
        if event.is_terminal() {
            self.saw_terminal = true;
        }
        Some(event)
    }

    /// Waits until the session task reached a terminal state.
    pub async fn wait_terminal(&mut self) -> SessionState {
        let reached = match self.state_rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => Some(*state),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *self.state_rx.borrow())
    }

    /// Drives the remaining events into `callbacks` and returns the final
    /// state.
    pub async fn dispatch<C: SessionCallbacks + ?Sized>(mut self, callbacks: &mut C) -> SessionState {
        while let Some(event) = self.next_event().await {
            event.dispatch_to(callbacks);
        }
        self.wait_terminal().await
    }
}

struct EventGate {
    generation: u64,
    live: Arc<AtomicU64>,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventGate {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst) == self.generation
    }
}

struct SessionTask {
    engine: Arc<EngineInner>,
    session: StreamSession,
    request: StreamRequest,
    gate: EventGate,
    state_tx: watch::Sender<SessionState>,
    abort_rx: watch::Receiver<bool>,
}

impl SessionTask {
    async fn run(mut self) {
        self.advance(SessionState::Starting);
        self.publish(Notice::StreamStarted {
            conversation_id: self.session.started_conversation_id().cloned(),
        });

        let outcome = self.drive().await;

        if self.engine.release(self.gate.generation) {
            self.engine.notices.publish(Notice::StreamEnded {
                conversation_id: self.session.conversation_id().cloned(),
            });
        }
        debug!(
            event = "stream.session_finished",
            domain = "stream",
            request_id = %self.session.request_id(),
            state = ?outcome
        );
        self.state_tx.send_replace(outcome);
    }

    async fn drive(&mut self) -> SessionState {
        let sent = tokio::select! {
            biased;
            () = wait_for_abort(&mut self.abort_rx) => return self.cancelled(),
            sent = self.engine.transport.send(&self.request) => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(err) => return self.fail(SessionFailure::from(&err)).await,
        };
        if !response.is_success() {
            let status_code = response.status;
            return self
                .fail(SessionFailure::Status {
                    status_code,
                    message: format!("stream request returned status {status_code}"),
                })
                .await;
        }
        let metadata = self.read_metadata(&response);
        if !self.bind_metadata(metadata).await {
            return self.cancelled();
        }
        self.advance(SessionState::Streaming);

        match response.body {
            ResponseBody::Buffered(text) => {
                debug!(
                    event = "stream.buffered_body",
                    domain = "stream",
                    request_id = %self.session.request_id(),
                    bytes = text.len() as u64
                );
                if !text.is_empty() && !self.emit(SessionEvent::Chunk { text }).await {
                    return self.cancelled();
                }
                self.complete().await
            }
            ResponseBody::Streaming(body) => self.consume(body).await,
        }
    }

    async fn consume(&mut self, mut body: ByteStream) -> SessionState {
        let mut decoder = FrameDecoder::new();
        let mut assembler = ResultBlockAssembler::new();
        loop {
            let next = tokio::select! {
                biased;
                () = wait_for_abort(&mut self.abort_rx) => return self.cancelled(),
                next = body.next() => next,
            };
            let frames = match next {
                Some(Ok(chunk)) => decoder.push_chunk(&chunk),
                Some(Err(err)) => return self.fail(SessionFailure::from(&err)).await,
                None => {
                    // A body that closes without a sentinel still completes.
                    let mut frames = decoder.finish();
                    frames.push(Frame::Done);
                    frames
                }
            };
            for frame in frames {
                if let ControlFlow::Break(state) = self.apply_frame(frame, &mut assembler).await {
                    return state;
                }
            }
        }
    }

    async fn apply_frame(
        &mut self,
        frame: Frame,
        assembler: &mut ResultBlockAssembler,
    ) -> ControlFlow<SessionState> {
        let event = match frame {
            Frame::Status(text) => SessionEvent::Status { text },
            Frame::TextDelta(text) | Frame::RawLine(text) => SessionEvent::Chunk { text },
            Frame::ResultBlockChunk(chunk) => {
                assembler.push(&chunk);
                return ControlFlow::Continue(());
            }
            Frame::ResultBlockEnd => match assembler.finish() {
                Ok(payload) => SessionEvent::KvResults { payload },
                Err(err) => {
                    warn!(
                        event = "stream.result_block_dropped",
                        domain = "stream",
                        request_id = %self.session.request_id(),
                        error = %err
                    );
                    return ControlFlow::Continue(());
                }
            },
            Frame::Done => {
                if !assembler.is_empty() {
                    warn!(
                        event = "stream.result_block_unterminated",
                        domain = "stream",
                        request_id = %self.session.request_id()
                    );
                    assembler.reset();
                }
                return ControlFlow::Break(self.complete().await);
            }
        };
        if self.emit(event).await {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(self.cancelled())
        }
    }

    fn read_metadata(&self, response: &TransportResponse) -> ResponseMetadata {
        let options = &self.engine.options;
        ResponseMetadata {
            conversation_id: header_value(response, &options.conversation_header)
                .map(ConversationId::new),
            user_message_id: header_value(response, &options.user_message_header)
                .map(MessageId::new),
        }
    }

    /// Binds the disclosed ids. Returns false when nobody listens anymore.
    async fn bind_metadata(&mut self, disclosed: ResponseMetadata) -> bool {
        let ResponseMetadata {
            conversation_id,
            user_message_id,
        } = disclosed;
        if conversation_id.is_none() && user_message_id.is_none() {
            debug!(
                event = "stream.metadata_missing",
                domain = "stream",
                request_id = %self.session.request_id()
            );
            return true;
        }

        if user_message_id.is_some() {
            self.session.user_message_id = user_message_id;
        }
        let newly_resolved = match conversation_id {
            Some(id) => self.session.resolve(id),
            None => false,
        };
        let metadata = self.session.metadata();
        if !self.emit(SessionEvent::Metadata(metadata)).await {
            return false;
        }

        if newly_resolved && let Some(id) = self.session.resolved_conversation_id().cloned() {
            self.engine.record_conversation(self.gate.generation, &id);
            if self.session.started_conversation_id().is_none() {
                let now = Utc::now();
                let title =
                    conversation_title(self.request.query(), self.engine.options.title_max_chars);
                info!(
                    event = "stream.conversation_created",
                    domain = "stream",
                    request_id = %self.session.request_id(),
                    conversation_id = %id
                );
                self.publish(Notice::ConversationCreated(ConversationSummary {
                    id,
                    title,
                    created_at: now,
                    updated_at: now,
                    just_created: true,
                }));
            }
        }
        true
    }

    async fn complete(&mut self) -> SessionState {
        if !self.session.transition(SessionState::Completed) {
            return self.session.state();
        }
        let metadata = self.session.metadata();
        self.emit(SessionEvent::Done(metadata)).await;
        if let Some(id) = self.session.conversation_id().cloned() {
            self.publish(Notice::ConversationTouched {
                id,
                timestamp: Utc::now(),
            });
        }
        info!(
            event = "stream.session_completed",
            domain = "stream",
            request_id = %self.session.request_id()
        );
        SessionState::Completed
    }

    async fn fail(&mut self, failure: SessionFailure) -> SessionState {
        if self.is_aborted() || !self.gate.is_live() {
            return self.cancelled();
        }
        if !self.session.transition(SessionState::Failed) {
            return self.session.state();
        }
        warn!(
            event = "stream.session_failed",
            domain = "stream",
            request_id = %self.session.request_id(),
            error = %failure
        );
        self.emit(SessionEvent::Error { error: failure }).await;
        SessionState::Failed
    }

    fn cancelled(&mut self) -> SessionState {
        self.session.transition(SessionState::Cancelled);
        self.session.state()
    }

    fn advance(&mut self, next: SessionState) {
        if self.session.transition(next) {
            self.state_tx.send_replace(next);
        }
    }

    fn is_aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    fn publish(&self, notice: Notice) {
        if self.gate.is_live() && !self.is_aborted() {
            self.engine.notices.publish(notice);
        }
    }

    /// Sends one event unless the session was aborted or superseded.
    async fn emit(&mut self, event: SessionEvent) -> bool {
        if self.is_aborted() || !self.gate.is_live() {
            return false;
        }
        tokio::select! {
            biased;
            () = wait_for_abort(&mut self.abort_rx) => false,
            sent = self.gate.tx.send(event) => sent.is_ok(),
        }
    }
}

fn header_value(response: &TransportResponse, name: &str) -> Option<String> {
    response
        .header(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

/// Resolves once the abort flag is set; never resolves if every handle is gone.
async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}
