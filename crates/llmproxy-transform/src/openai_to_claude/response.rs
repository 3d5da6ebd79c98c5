//! OpenAI Chat Completions response -> Anthropic Messages response.
//!
//! On the live request path whenever the selected candidate provider is
//! `openai`-typed: the upstream answers in its own wire format and the
//! client always expects Anthropic's.

use serde_json::Value;

use llmproxy_protocol::claude::types as claude;
use llmproxy_protocol::openai::types as openai;

pub fn transform_response(response: openai::ChatCompletionResponse) -> claude::MessagesResponse {
    let choice = response.choices.into_iter().next();
    let (content, stop_reason) = match choice {
        Some(choice) => (
            message_blocks(choice.message),
            choice.finish_reason.map(map_finish_reason),
        ),
        None => (Vec::new(), None),
    };

    let usage = response
        .usage
        .map(|usage| claude::Usage {
            input_tokens: usage.prompt_tokens.max(0) as u32,
            output_tokens: usage.completion_tokens.max(0) as u32,
        })
        .unwrap_or(claude::Usage {
            input_tokens: 0,
            output_tokens: 0,
        });

    claude::MessagesResponse {
        id: response.id,
        kind: "message".to_string(),
        role: claude::Role::Assistant,
        model: response.model,
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

fn message_blocks(message: openai::ChatMessage) -> Vec<claude::ContentBlock> {
    let mut blocks = Vec::new();

    match message.content {
        Some(openai::ChatMessageContent::Text(text)) if !text.is_empty() => {
            blocks.push(claude::ContentBlock::Text { text });
        }
        Some(openai::ChatMessageContent::Parts(parts)) => {
            for part in parts {
                if let openai::ChatMessagePart::Text { text } = part {
                    blocks.push(claude::ContentBlock::Text { text });
                }
            }
        }
        _ => {}
    }

    for call in message.tool_calls.into_iter().flatten() {
        let input: Value = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::Object(Default::default()));
        blocks.push(claude::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    blocks
}

fn map_finish_reason(reason: openai::ChatCompletionFinishReason) -> claude::StopReason {
    match reason {
        openai::ChatCompletionFinishReason::Stop => claude::StopReason::EndTurn,
        openai::ChatCompletionFinishReason::Length => claude::StopReason::MaxTokens,
        openai::ChatCompletionFinishReason::ToolCalls => claude::StopReason::ToolUse,
        openai::ChatCompletionFinishReason::ContentFilter => claude::StopReason::StopSequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_response(choice: openai::ChatCompletionChoice) -> openai::ChatCompletionResponse {
        openai::ChatCompletionResponse {
            id: "chatcmpl_1".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![choice],
            usage: Some(openai::CompletionUsage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            }),
        }
    }

    #[test]
    fn text_message_becomes_text_block_with_end_turn() {
        let response = base_response(openai::ChatCompletionChoice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::ChatCompletionRole::Assistant,
                content: Some(openai::ChatMessageContent::Text("hello".to_string())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            finish_reason: Some(openai::ChatCompletionFinishReason::Stop),
        });

        let converted = transform_response(response);
        assert!(matches!(&converted.content[0], claude::ContentBlock::Text { text } if text == "hello"));
        assert_eq!(converted.stop_reason, Some(claude::StopReason::EndTurn));
        assert_eq!(converted.usage.input_tokens, 3);
        assert_eq!(converted.usage.output_tokens, 2);
    }

    #[test]
    fn tool_calls_become_tool_use_blocks_with_tool_use_stop_reason() {
        let response = base_response(openai::ChatCompletionChoice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::ChatCompletionRole::Assistant,
                content: None,
                tool_calls: Some(vec![openai::ChatCompletionMessageToolCall {
                    id: "call_1".to_string(),
                    kind: openai::ChatCompletionToolCallType::Function,
                    function: openai::ChatCompletionMessageToolCallFunction {
                        name: "get_weather".to_string(),
                        arguments: "{}".to_string(),
                    },
                }]),
                tool_call_id: None,
                name: None,
            },
            finish_reason: Some(openai::ChatCompletionFinishReason::ToolCalls),
        });

        let converted = transform_response(response);
        assert!(matches!(&converted.content[0], claude::ContentBlock::ToolUse { id, .. } if id == "call_1"));
        assert_eq!(converted.stop_reason, Some(claude::StopReason::ToolUse));
    }
}
