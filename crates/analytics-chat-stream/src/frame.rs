//! Line decoder for the assistant's mixed response body.
//!
//! The body is newline-delimited text carrying `status:` updates, `data:` text
//! fragments, unprefixed text, and one or more `kv_results:` blocks closed by a
//! `_kv_results_end_` sentinel. The decoder keeps the trailing partial line
//! between deliveries, so the frames it yields do not depend on how the
//! transport split the bytes.

pub(crate) const STATUS_PREFIX: &str = "status:";
pub(crate) const DATA_PREFIX: &str = "data:";
pub(crate) const RESULT_BLOCK_PREFIX: &str = "kv_results:";
pub(crate) const RESULT_BLOCK_END: &str = "_kv_results_end_";
const DONE_SENTINEL: &str = "[DONE]";

/// One classified unit of the response body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Human-readable progress text; replaces the previous status.
    Status(String),
    /// Markdown fragment from a `data:` line.
    TextDelta(String),
    /// One line (newline included) of an open result block.
    ResultBlockChunk(String),
    /// The open result block is complete.
    ResultBlockEnd,
    /// Terminal sentinel; nothing after it is decoded.
    Done,
    /// Unprefixed text outside a result block, passed through verbatim.
    RawLine(String),
}

impl Frame {
    /// Returns the text of frames that grow the assistant message.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta(text) | Self::RawLine(text) => Some(text),
            _ => None,
        }
    }
}

/// Incremental decoder from raw body chunks to [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    in_block: bool,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a result block is open.
    pub fn in_result_block(&self) -> bool {
        self.in_block
    }

    /// Returns true once `Done` was decoded or the decoder was finished.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Convenience wrapper over [`FrameDecoder::push_chunk`] for text input.
    pub fn push_str(&mut self, chunk: &str) -> Vec<Frame> {
        self.push_chunk(chunk.as_bytes())
    }

    /// Feeds one transport delivery and returns the frames of every line it
    /// completed.
    ///
    /// The carry-over is kept as bytes, so a UTF-8 sequence split between two
    /// deliveries is decoded only once its line is complete.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = decode_line(&self.buf[start..end]);
            start = end + 1;
            self.classify(&line, &mut frames);
            if self.done {
                self.buf.clear();
                return frames;
            }
        }
        self.buf.drain(..start);
        frames
    }

    /// Flushes the buffered partial line at transport close.
    ///
    /// A result block still open afterwards is ended so the assembler can
    /// attempt whatever arrived.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = decode_line(&rest);
            self.classify(&line, &mut frames);
        }
        if self.in_block && !self.done {
            self.in_block = false;
            frames.push(Frame::ResultBlockEnd);
        }
        self.done = true;
        frames
    }

    fn classify(&mut self, line: &str, frames: &mut Vec<Frame>) {
        if line.is_empty() {
            if self.in_block {
                frames.push(Frame::ResultBlockChunk("\n".to_string()));
            }
            return;
        }
        if is_done_line(line) {
            self.done = true;
            self.in_block = false;
            frames.push(Frame::Done);
            return;
        }
        if let Some(rest) = line.strip_prefix(STATUS_PREFIX) {
            let text = rest.trim();
            if !text.is_empty() {
                frames.push(Frame::Status(text.to_string()));
            }
            return;
        }
        if !self.in_block
            && let Some(rest) = line.strip_prefix(RESULT_BLOCK_PREFIX)
        {
            self.in_block = true;
            self.push_block_line(rest, frames);
            return;
        }
        if self.in_block {
            self.push_block_line(line, frames);
            return;
        }
        if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            // One marker space at most: the payload's own spacing is content.
            let payload = rest.strip_prefix(' ').unwrap_or(rest);
            if !payload.is_empty() && payload.trim() != DONE_SENTINEL {
                frames.push(Frame::TextDelta(payload.to_string()));
            }
            return;
        }
        frames.push(Frame::RawLine(line.to_string()));
    }

    fn push_block_line(&mut self, text: &str, frames: &mut Vec<Frame>) {
        match text.find(RESULT_BLOCK_END) {
            Some(idx) => {
                let before = &text[..idx];
                if !before.is_empty() {
                    frames.push(Frame::ResultBlockChunk(before.to_string()));
                }
                self.in_block = false;
                frames.push(Frame::ResultBlockEnd);
            }
            None => frames.push(Frame::ResultBlockChunk(format!("{text}\n"))),
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn is_done_line(line: &str) -> bool {
    matches!(line.trim(), "[DONE]" | "data:[DONE]" | "data: [DONE]")
}
