//! Anthropic Messages response -> OpenAI Chat Completions response.
//!
//! Not on the main request path (providers never need a synthesised OpenAI
//! response out of a Claude one) but exercised by the conversion-roundtrip
//! property: `anthropic -> openai -> anthropic` must equal the original up
//! to documented field renames.

use llmproxy_protocol::claude::types as claude;
use llmproxy_protocol::openai::types as openai;

pub fn transform_response(
    response: claude::MessagesResponse,
    created: i64,
) -> openai::ChatCompletionResponse {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            claude::ContentBlock::Text { text } => text_parts.push(text),
            claude::ContentBlock::Thinking { thinking, .. } => text_parts.push(thinking),
            claude::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ChatCompletionMessageToolCall {
                    id,
                    kind: openai::ChatCompletionToolCallType::Function,
                    function: openai::ChatCompletionMessageToolCallFunction {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            claude::ContentBlock::Image { .. } | claude::ContentBlock::ToolResult { .. } => {
                tracing::warn!("dropping unrepresentable content block in response conversion");
            }
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(openai::ChatMessageContent::Text(text_parts.join("")))
    };

    openai::ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created,
        model: response.model,
        choices: vec![openai::ChatCompletionChoice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::ChatCompletionRole::Assistant,
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
                name: None,
            },
            finish_reason: response.stop_reason.map(map_stop_reason),
        }],
        usage: Some(openai::CompletionUsage {
            prompt_tokens: response.usage.input_tokens as i64,
            completion_tokens: response.usage.output_tokens as i64,
            total_tokens: (response.usage.input_tokens + response.usage.output_tokens) as i64,
        }),
    }
}

fn map_stop_reason(reason: claude::StopReason) -> openai::ChatCompletionFinishReason {
    match reason {
        claude::StopReason::EndTurn | claude::StopReason::StopSequence => {
            openai::ChatCompletionFinishReason::Stop
        }
        claude::StopReason::MaxTokens => openai::ChatCompletionFinishReason::Length,
        claude::StopReason::ToolUse => openai::ChatCompletionFinishReason::ToolCalls,
    }
}
