//! Scripted transports for engine and controller tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::StreamExt as _;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::errors::StreamError;
use crate::request::StreamRequest;
use crate::transport::{ByteStream, ResponseBody, StreamTransport, TransportResponse};

/// One canned reply, consumed per `send` call in order.
pub(crate) enum Script {
    Body {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<Result<&'static str, StreamError>>,
        /// Keep the body open after the last chunk.
        then_pending: bool,
    },
    Buffered {
        headers: Vec<(&'static str, &'static str)>,
        text: &'static str,
    },
    Fail(StreamError),
    /// Waits for `gate` before replying with `script`.
    Gated { gate: Arc<Notify>, script: Box<Script> },
    /// Never replies.
    Pending,
}

impl Script {
    pub(crate) fn body(
        headers: &[(&'static str, &'static str)],
        chunks: &[&'static str],
    ) -> Self {
        Self::Body {
            status: 200,
            headers: headers.to_vec(),
            chunks: chunks.iter().map(|chunk| Ok(*chunk)).collect(),
            then_pending: false,
        }
    }

    pub(crate) fn with_status(status: u16, chunks: &[&'static str]) -> Self {
        Self::Body {
            status,
            headers: Vec::new(),
            chunks: chunks.iter().map(|chunk| Ok(*chunk)).collect(),
            then_pending: false,
        }
    }
}

pub(crate) struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl StreamTransport for ScriptedTransport {
    async fn send(&self, _request: &StreamRequest) -> Result<TransportResponse, StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Pending);
        respond(script).await
    }
}

async fn respond(mut script: Script) -> Result<TransportResponse, StreamError> {
    loop {
        match script {
            Script::Gated { gate, script: inner } => {
                gate.notified().await;
                script = *inner;
            }
            Script::Pending => std::future::pending::<()>().await,
            Script::Fail(err) => return Err(err),
            Script::Buffered { headers, text } => {
                return Ok(TransportResponse {
                    status: 200,
                    headers: header_map(&headers),
                    body: ResponseBody::Buffered(text.to_string()),
                });
            }
            Script::Body {
                status,
                headers,
                chunks,
                then_pending,
            } => {
                let head = futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| chunk.map(|text| Bytes::from_static(text.as_bytes()))),
                );
                let body: ByteStream = if then_pending {
                    Box::pin(head.chain(futures::stream::pending()))
                } else {
                    Box::pin(head)
                };
                return Ok(TransportResponse {
                    status,
                    headers: header_map(&headers),
                    body: ResponseBody::Streaming(body),
                });
            }
        }
    }
}

fn header_map(headers: &[(&'static str, &'static str)]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), (*value).to_string()))
        .collect()
}
