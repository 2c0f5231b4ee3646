use crate::request::{ConversationId, MessageId};
use crate::result_block::ResultPayload;
use crate::status::StatusProjector;

const SENTENCE_PUNCTUATION: [char; 6] = ['.', '!', '?', ',', ';', ':'];
const CODE_FENCE: &str = "```";

/// Identifier prefixes that are legitimately followed directly by letters or
/// digits (`addr1...`, `stake1...`, `pool1...`), so a fragment boundary after
/// them must not get a space.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct JoinPrefixes(Vec<String>);

impl Default for JoinPrefixes {
    fn default() -> Self {
        Self::new([
            "addr",
            "addr_test",
            "stake",
            "stake_test",
            "pool",
            "asset",
            "drep",
            "0x",
        ])
    }
}

impl JoinPrefixes {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            prefixes
                .into_iter()
                .map(Into::into)
                .map(|p: String| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        )
    }

    /// Parses a comma-separated list such as `addr,stake,pool`.
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True when `content` ends with one of the prefixes at a word boundary.
    pub fn matches_tail(&self, content: &str) -> bool {
        self.iter().any(|prefix| ends_with_token(content, prefix))
    }
}

fn ends_with_token(content: &str, prefix: &str) -> bool {
    let Some(start) = content.len().checked_sub(prefix.len()) else {
        return false;
    };
    if !content.is_char_boundary(start) || !content[start..].eq_ignore_ascii_case(prefix) {
        return false;
    }
    content[..start]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_alphanumeric())
}

/// Separator to put between `existing` and `fragment`: either nothing or one
/// space.
fn separator(existing: &str, fragment: &str, prefixes: &JoinPrefixes) -> &'static str {
    let (Some(last), Some(first)) = (existing.chars().next_back(), fragment.chars().next()) else {
        return "";
    };
    if first.is_whitespace() || last.is_whitespace() {
        return "";
    }
    if last.is_alphanumeric() && first.is_alphanumeric() {
        return if prefixes.matches_tail(existing) {
            ""
        } else {
            " "
        };
    }
    if SENTENCE_PUNCTUATION.contains(&last) && first.is_alphabetic() {
        return " ";
    }
    // `3.` + `14` stays a decimal; everything else joins as-is.
    ""
}

/// Joins a streamed fragment onto existing message text.
///
/// Rules, first match wins: whitespace on either side joins directly; an
/// alphanumeric boundary gets one space unless `existing` ends with an
/// identifier prefix; sentence punctuation followed by a letter gets one
/// space; anything else (including `.` followed by a digit) joins directly.
pub fn smart_append(existing: &str, fragment: &str, prefixes: &JoinPrefixes) -> String {
    let sep = separator(existing, fragment, prefixes);
    let mut out = String::with_capacity(existing.len() + sep.len() + fragment.len());
    out.push_str(existing);
    out.push_str(sep);
    out.push_str(fragment);
    out
}

/// Repairs artifacts of incremental rendering once a message is complete.
///
/// Normalizes line endings, collapses runs of blank lines outside code fences
/// to one, trims the outer whitespace and closes a dangling code fence.
/// Applying it twice gives the same result as applying it once.
pub fn finalize_markdown(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    let mut in_fence = false;
    let mut blank_run = 0usize;
    for line in normalized.split('\n') {
        if !in_fence && line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        if line.trim_start().starts_with(CODE_FENCE) {
            in_fence = !in_fence;
        }
        out.push_str(line);
        out.push('\n');
    }

    let mut out = out.trim().to_string();
    if in_fence {
        out.push('\n');
        out.push_str(CODE_FENCE);
    }
    out
}

/// Assistant reply as shown in the conversation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssistantMessage {
    pub id: MessageId,
    pub conversation_id: Option<ConversationId>,
    /// Grows monotonically while streaming; fixed after finalize.
    pub content: String,
    pub streaming: bool,
    /// Current status line; empty when none or after finalize.
    pub status_text: String,
    /// Result blocks received for this reply, in arrival order.
    pub results: Vec<ResultPayload>,
}

/// Builds one assistant message from streamed frames.
#[derive(Debug)]
pub struct MessageAggregator {
    message: AssistantMessage,
    status: StatusProjector,
    prefixes: JoinPrefixes,
}

impl MessageAggregator {
    pub fn new(conversation_id: Option<ConversationId>, prefixes: JoinPrefixes) -> Self {
        Self {
            message: AssistantMessage {
                id: MessageId::new(uuid::Uuid::new_v4().to_string()),
                conversation_id,
                content: String::new(),
                streaming: true,
                status_text: String::new(),
                results: Vec::new(),
            },
            status: StatusProjector::new(),
            prefixes,
        }
    }

    pub fn message(&self) -> &AssistantMessage {
        &self.message
    }

    pub fn into_message(self) -> AssistantMessage {
        self.message
    }

    pub fn is_streaming(&self) -> bool {
        self.message.streaming
    }

    /// Grows the content with one text fragment. Ignored after finalize.
    pub fn append(&mut self, fragment: &str) -> bool {
        if !self.message.streaming || fragment.is_empty() {
            return false;
        }
        let sep = separator(&self.message.content, fragment, &self.prefixes);
        self.message.content.push_str(sep);
        self.message.content.push_str(fragment);
        true
    }

    /// Replaces the status line. Ignored after finalize.
    pub fn set_status(&mut self, text: &str) -> bool {
        if !self.message.streaming || !self.status.replace(text) {
            return false;
        }
        self.message.status_text = self.status.current().to_string();
        true
    }

    /// Attaches a result payload. Ignored after finalize.
    pub fn push_result(&mut self, payload: ResultPayload) -> bool {
        if !self.message.streaming {
            return false;
        }
        self.message.results.push(payload);
        true
    }

    /// Records the conversation once the backend disclosed it.
    pub fn set_conversation(&mut self, conversation_id: ConversationId) {
        self.message.conversation_id = Some(conversation_id);
    }

    /// Ends streaming: clears the status and finalizes the markdown. Returns
    /// false when the message was already finalized.
    pub fn finalize(&mut self) -> bool {
        if !self.message.streaming {
            return false;
        }
        self.message.streaming = false;
        self.status.clear();
        self.message.status_text.clear();
        self.message.content = finalize_markdown(&self.message.content);
        true
    }
}
