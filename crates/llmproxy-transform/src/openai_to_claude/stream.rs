//! OpenAI Chat Completions streaming chunks -> Anthropic Messages streaming
//! events.
//!
//! This is the converter actually exercised on the request path: whenever a
//! stream is routed to an `openai`-typed provider, its chunks pass through
//! [`OpenAiToClaudeStreamState`] one at a time before being forwarded (and
//! published to the dedup broadcaster) as Anthropic SSE frames.
//!
//! OpenAI interleaves `tool_calls` deltas by a per-choice `index` that is
//! independent of content-block ordering, and may send a text delta and a
//! tool-call delta in the same chunk. We track at most one open Anthropic
//! content block at a time and close it (`content_block_stop`) whenever the
//! next delta would belong to a different block.

use std::collections::HashMap;

use llmproxy_protocol::claude::stream::{
    ContentBlockDelta, MessageDelta, StreamContentBlockStart, StreamEventKnown, StreamMessageStart,
    StreamUsage,
};
use llmproxy_protocol::claude::types::{Role, StopReason};
use llmproxy_protocol::openai::stream::ChatCompletionChunk;
use llmproxy_protocol::openai::types::ChatCompletionFinishReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    ToolUse(u32),
}

#[derive(Debug, Default)]
pub struct OpenAiToClaudeStreamState {
    started: bool,
    next_index: u32,
    open: Option<(u32, OpenBlock)>,
    /// Maps an OpenAI tool-call `index` to the Anthropic block index it is
    /// currently occupying. Entries are removed once that block closes
    /// (`close_open`) — if upstream later sends another delta for the same
    /// tool-call index, it must open a fresh Anthropic block rather than
    /// delta into one we already emitted `content_block_stop` for.
    tool_block_index: HashMap<u32, u32>,
}

impl OpenAiToClaudeStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts one upstream chunk into zero or more Anthropic stream
    /// events, in emission order.
    pub fn push_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEventKnown> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(StreamEventKnown::MessageStart {
                message: StreamMessageStart {
                    id: chunk.id.clone(),
                    model: chunk.model.clone(),
                    role: Role::Assistant,
                    usage: None,
                },
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                self.ensure_block(&mut events, OpenBlock::Text);
                events.push(StreamEventKnown::ContentBlockDelta {
                    index: self.open.unwrap().0,
                    delta: ContentBlockDelta::TextDelta { text },
                });
            }
        }

        for call in choice.delta.tool_calls.into_iter().flatten() {
            let tool_index = call.index;
            let already_open = self.tool_block_index.contains_key(&tool_index);
            self.ensure_block(&mut events, OpenBlock::ToolUse(tool_index));
            let index = self.open.unwrap().0;

            if !already_open {
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("toolu_{tool_index}"));
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                events.push(StreamEventKnown::ContentBlockStart {
                    index,
                    content_block: StreamContentBlockStart::ToolUse {
                        id,
                        name,
                        input: serde_json::Value::Object(Default::default()),
                    },
                });
            }

            if let Some(arguments) = call.function.and_then(|f| f.arguments) {
                if !arguments.is_empty() {
                    events.push(StreamEventKnown::ContentBlockDelta {
                        index,
                        delta: ContentBlockDelta::InputJsonDelta {
                            partial_json: arguments,
                        },
                    });
                }
            }
        }

        if let Some(finish_reason) = choice.finish_reason {
            self.close_open(&mut events);
            events.push(StreamEventKnown::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(map_finish_reason(finish_reason)),
                    stop_sequence: None,
                },
                usage: chunk
                    .usage
                    .map(|usage| StreamUsage {
                        input_tokens: Some(usage.prompt_tokens.max(0) as u32),
                        output_tokens: Some(usage.completion_tokens.max(0) as u32),
                    })
                    .unwrap_or_default(),
            });
            events.push(StreamEventKnown::MessageStop);
        }

        events
    }

    /// Closes out a stream the upstream ended without a `finish_reason`
    /// (e.g. connection EOF after the last data chunk).
    pub fn finish(&mut self) -> Vec<StreamEventKnown> {
        let mut events = Vec::new();
        if !self.started {
            return events;
        }
        self.close_open(&mut events);
        events.push(StreamEventKnown::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(StopReason::EndTurn),
                stop_sequence: None,
            },
            usage: StreamUsage::default(),
        });
        events.push(StreamEventKnown::MessageStop);
        events
    }

    fn ensure_block(&mut self, events: &mut Vec<StreamEventKnown>, wanted: OpenBlock) {
        if let Some((_, kind)) = self.open {
            if kind == wanted {
                return;
            }
            self.close_open(events);
        }

        match wanted {
            OpenBlock::Text => {
                let index = self.next_index;
                self.next_index += 1;
                self.open = Some((index, wanted));
                events.push(StreamEventKnown::ContentBlockStart {
                    index,
                    content_block: StreamContentBlockStart::Text {
                        text: String::new(),
                    },
                });
            }
            OpenBlock::ToolUse(tool_index) => {
                let index = *self.tool_block_index.entry(tool_index).or_insert_with(|| {
                    let idx = self.next_index;
                    self.next_index += 1;
                    idx
                });
                self.open = Some((index, wanted));
                // content_block_start for a previously-unseen tool index is
                // emitted by the caller, which knows the call's id/name.
            }
        }
    }

    fn close_open(&mut self, events: &mut Vec<StreamEventKnown>) {
        if let Some((index, kind)) = self.open.take() {
            if let OpenBlock::ToolUse(tool_index) = kind {
                // A closed block can never receive another delta; forget
                // the mapping so a later delta for the same OpenAI
                // tool-call index opens a new Anthropic block instead of
                // targeting one that already got `content_block_stop`.
                self.tool_block_index.remove(&tool_index);
            }
            events.push(StreamEventKnown::ContentBlockStop { index });
        }
    }
}

fn map_finish_reason(reason: ChatCompletionFinishReason) -> StopReason {
    match reason {
        ChatCompletionFinishReason::Stop => StopReason::EndTurn,
        ChatCompletionFinishReason::Length => StopReason::MaxTokens,
        ChatCompletionFinishReason::ToolCalls => StopReason::ToolUse,
        ChatCompletionFinishReason::ContentFilter => StopReason::StopSequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmproxy_protocol::openai::stream::{
        ChatCompletionMessageToolCallChunk, ChatCompletionMessageToolCallChunkFunction,
        ChatCompletionStreamChoice, ChatCompletionStreamDelta,
    };

    fn chunk(
        choice: ChatCompletionStreamChoice,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![choice],
            usage: None,
        }
    }

    #[test]
    fn emits_message_start_once_then_text_deltas() {
        let mut state = OpenAiToClaudeStreamState::new();
        let events = state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: Some("hi".to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }));
        assert!(matches!(events[0], StreamEventKnown::MessageStart { .. }));
        assert!(matches!(
            events[1],
            StreamEventKnown::ContentBlockStart { index: 0, .. }
        ));
        assert!(matches!(
            events[2],
            StreamEventKnown::ContentBlockDelta { index: 0, .. }
        ));

        let events = state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: Some(" there".to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }));
        assert_eq!(events.len(), 1);
        assert!(!matches!(events[0], StreamEventKnown::MessageStart { .. }));
    }

    #[test]
    fn switching_to_tool_use_closes_text_block() {
        let mut state = OpenAiToClaudeStreamState::new();
        state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: Some("thinking".to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }));

        let events = state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                    index: 0,
                    id: Some("call_1".to_string()),
                    function: Some(ChatCompletionMessageToolCallChunkFunction {
                        name: Some("get_weather".to_string()),
                        arguments: Some("{\"city\":".to_string()),
                    }),
                }]),
            },
            finish_reason: None,
        }));

        assert!(matches!(
            events[0],
            StreamEventKnown::ContentBlockStop { index: 0 }
        ));
        assert!(matches!(
            events[1],
            StreamEventKnown::ContentBlockStart { index: 1, .. }
        ));
    }

    #[test]
    fn finish_reason_closes_block_and_emits_terminal_frames() {
        let mut state = OpenAiToClaudeStreamState::new();
        state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: Some("done".to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }));
        let events = state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta::default(),
            finish_reason: Some(ChatCompletionFinishReason::Stop),
        }));
        assert!(matches!(events[0], StreamEventKnown::ContentBlockStop { .. }));
        assert!(matches!(events[1], StreamEventKnown::MessageDelta { .. }));
        assert!(matches!(events[2], StreamEventKnown::MessageStop));
    }

    #[test]
    fn tool_call_interrupted_then_resumed_opens_a_fresh_block_instead_of_reusing_closed_one() {
        let mut state = OpenAiToClaudeStreamState::new();
        // Opens tool-call index 0 as Anthropic block 0.
        state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                    index: 0,
                    id: Some("call_1".to_string()),
                    function: Some(ChatCompletionMessageToolCallChunkFunction {
                        name: Some("get_weather".to_string()),
                        arguments: Some("{\"city\":".to_string()),
                    }),
                }]),
            },
            finish_reason: None,
        }));

        // A text delta closes block 0 and opens block 1.
        state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: Some("aside".to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }));

        // Tool-call index 0 resumes: must open a brand new block (index 2),
        // not delta into the already-stopped block 0.
        let events = state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                    index: 0,
                    id: None,
                    function: Some(ChatCompletionMessageToolCallChunkFunction {
                        name: None,
                        arguments: Some("\"paris\"}".to_string()),
                    }),
                }]),
            },
            finish_reason: None,
        }));

        assert!(matches!(
            events[0],
            StreamEventKnown::ContentBlockStop { index: 1 }
        ));
        assert!(matches!(
            events[1],
            StreamEventKnown::ContentBlockStart { index: 2, .. }
        ));
        assert!(matches!(
            events[2],
            StreamEventKnown::ContentBlockDelta { index: 2, .. }
        ));
    }

    #[test]
    fn finish_closes_dangling_block_when_upstream_never_sent_a_finish_reason() {
        let mut state = OpenAiToClaudeStreamState::new();
        state.push_chunk(chunk(ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamDelta {
                role: None,
                content: Some("partial".to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }));

        let events = state.finish();
        assert!(matches!(events[0], StreamEventKnown::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEventKnown::MessageDelta { .. }));
        assert!(matches!(events[2], StreamEventKnown::MessageStop));
    }

    #[test]
    fn finish_is_a_noop_before_any_chunk_was_pushed() {
        let mut state = OpenAiToClaudeStreamState::new();
        assert!(state.finish().is_empty());
    }
}
