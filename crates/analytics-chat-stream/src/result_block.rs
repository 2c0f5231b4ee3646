use serde_json::{Map, Value};

use crate::errors::ResultBlockError;
use crate::frame::RESULT_BLOCK_PREFIX;

/// Structured result (table or chart data) carried by one result block.
///
/// Mapping a payload to something renderable is left to the caller.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultPayload {
    /// Discriminator chosen by the backend (for example `table` or `chart`).
    pub result_type: String,
    /// Every other field of the block, untouched.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ResultPayload {
    /// Builds a payload from a decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ResultBlockError> {
        let Value::Object(mut data) = value else {
            return Err(ResultBlockError::MissingResultType);
        };
        match data.remove("result_type") {
            Some(Value::String(result_type)) => Ok(Self { result_type, data }),
            _ => Err(ResultBlockError::MissingResultType),
        }
    }

    /// Returns a field of the payload other than `result_type`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Re-assembles the payload as a single JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = self.data.clone();
        object.insert(
            "result_type".to_string(),
            Value::String(self.result_type.clone()),
        );
        Value::Object(object)
    }
}

/// Accumulates `ResultBlockChunk` frames until `ResultBlockEnd`.
#[derive(Debug, Default)]
pub struct ResultBlockAssembler {
    buf: String,
}

impl ResultBlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk in arrival order.
    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Returns true when no chunk is pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drops any pending chunks.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Parses the pending block and resets the assembler.
    ///
    /// A failure only concerns this block; the next block starts clean.
    pub fn finish(&mut self) -> Result<ResultPayload, ResultBlockError> {
        let raw = std::mem::take(&mut self.buf);
        parse_result_block(&raw)
    }
}

/// Decodes an assembled result block.
///
/// When the block is not valid JSON, the first balanced `{...}` inside it that
/// decodes to an object with a `result_type` is used instead. That recovery is
/// lossy: on truncated or adversarial input it can return an inner fragment
/// rather than the intended payload.
pub fn parse_result_block(raw: &str) -> Result<ResultPayload, ResultBlockError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix(RESULT_BLOCK_PREFIX)
        .map(str::trim)
        .unwrap_or(trimmed);
    if body.is_empty() {
        return Err(ResultBlockError::InvalidJson {
            message: "empty result block".into(),
        });
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => ResultPayload::from_value(value),
        Err(err) => recover_payload(body).ok_or_else(|| ResultBlockError::InvalidJson {
            message: err.to_string(),
        }),
    }
}

fn recover_payload(text: &str) -> Option<ResultPayload> {
    balanced_objects(text).into_iter().find_map(|candidate| {
        let value = serde_json::from_str::<Value>(candidate).ok()?;
        ResultPayload::from_value(value).ok()
    })
}

/// Every balanced `{...}` span of `text`, ordered by opening position.
///
/// Braces are paired in one pass with a stack, so unclosed openers cost
/// nothing extra. Braces inside JSON strings are ignored.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open.push(idx),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, idx + 1));
                }
            }
            _ => {}
        }
    }
    spans.sort_unstable_by_key(|&(start, _)| start);
    spans.into_iter().map(|(start, end)| &text[start..end]).collect()
}
