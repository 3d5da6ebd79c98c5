//! Anthropic Messages streaming events. Events whose `type` we don't
//! recognise deserialise to [`StreamEvent::Unknown`] rather than failing the
//! whole stream, so a future upstream addition degrades gracefully.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ContentBlock, Role, StopReason};

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Known(StreamEventKnown),
    Unknown(Value),
}

impl<'de> Deserialize<'de> for StreamEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match serde_json::from_value::<StreamEventKnown>(value.clone()) {
            Ok(known) => Ok(StreamEvent::Known(known)),
            Err(_) => Ok(StreamEvent::Unknown(value)),
        }
    }
}

impl Serialize for StreamEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            StreamEvent::Known(known) => known.serialize(serializer),
            StreamEvent::Unknown(value) => value.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKnown {
    MessageStart {
        message: StreamMessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: StreamContentBlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDelta,
        usage: StreamUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: super::error::ErrorDetail,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamMessageStart {
    pub id: String,
    pub model: String,
    pub role: Role,
    #[serde(default)]
    pub usage: Option<StreamUsage>,
}

/// A content block as it first appears in `content_block_start`; always
/// begins with an empty payload that `ContentBlockDelta`s then fill in.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamContentBlockStart {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

impl StreamContentBlockStart {
    pub fn into_content_block(self) -> ContentBlock {
        match self {
            StreamContentBlockStart::Text { text } => ContentBlock::Text { text },
            StreamContentBlockStart::Thinking { thinking } => ContentBlock::Thinking {
                thinking,
                signature: None,
            },
            StreamContentBlockStart::ToolUse { id, name, input } => {
                ContentBlock::ToolUse { id, name, input }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct StreamUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}
