//! Anthropic Messages request -> OpenAI Chat Completions request.

use llmproxy_protocol::claude::types as claude;
use llmproxy_protocol::openai::types as openai;

pub fn transform_request(request: claude::MessagesRequest) -> openai::ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(openai::ChatMessage {
                role: openai::ChatCompletionRole::System,
                content: Some(openai::ChatMessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for message in request.messages {
        messages.extend(map_message(message));
    }

    openai::ChatCompletionRequest {
        model: request.model,
        messages,
        stream: request.stream,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        tools: request.tools.map(|tools| tools.into_iter().map(map_tool).collect()),
        tool_choice: request.tool_choice,
    }
}

fn map_message(message: claude::Message) -> Vec<openai::ChatMessage> {
    let role = match message.role {
        claude::Role::User => openai::ChatCompletionRole::User,
        claude::Role::Assistant => openai::ChatCompletionRole::Assistant,
    };

    let blocks = message.content.as_blocks();

    // tool_result blocks become standalone role=tool messages; everything
    // else accumulates into one message of the original role.
    let mut out = Vec::new();
    let mut parts: Vec<openai::ChatMessagePart> = Vec::new();
    let mut tool_calls: Vec<openai::ChatCompletionMessageToolCall> = Vec::new();

    for block in blocks {
        match block {
            claude::ContentBlock::Text { text } => {
                parts.push(openai::ChatMessagePart::Text { text });
            }
            claude::ContentBlock::Thinking { thinking, .. } => {
                parts.push(openai::ChatMessagePart::Text { text: thinking });
            }
            claude::ContentBlock::Image { source } => {
                if let Some(part) = map_image_part(source) {
                    parts.push(part);
                }
            }
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
            claude::ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                out.push(map_tool_result_message(
                    tool_use_id,
                    content.map(|c| c.as_text()).unwrap_or_default(),
                ));
            }
        }
    }

    if !parts.is_empty() || !tool_calls.is_empty() {
        out.insert(
            0,
            openai::ChatMessage {
                role,
                content: flush_parts(parts),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
                name: None,
            },
        );
    }

    out
}

/// Collapses a single text part to a plain string (the common case) and
/// otherwise keeps the multimodal array shape.
fn flush_parts(parts: Vec<openai::ChatMessagePart>) -> Option<openai::ChatMessageContent> {
    match parts.as_slice() {
        [] => None,
        [openai::ChatMessagePart::Text { text }] => {
            Some(openai::ChatMessageContent::Text(text.clone()))
        }
        _ => Some(openai::ChatMessageContent::Parts(parts)),
    }
}

fn map_image_part(source: claude::ImageSource) -> Option<openai::ChatMessagePart> {
    let url = match (source.kind.as_str(), source.data, source.url, source.media_type) {
        ("base64", Some(data), _, media_type) => {
            let media_type = media_type.unwrap_or_else(|| "image/png".to_string());
            format!("data:{media_type};base64,{data}")
        }
        ("url", _, Some(url), _) => url,
        _ => {
            tracing::warn!("dropping image content block with unrecognised source shape");
            return None;
        }
    };
    Some(openai::ChatMessagePart::ImageUrl {
        image_url: openai::ChatImageUrl { url },
    })
}

fn map_tool_result_message(tool_use_id: String, text: String) -> openai::ChatMessage {
    openai::ChatMessage {
        role: openai::ChatCompletionRole::Tool,
        content: Some(openai::ChatMessageContent::Text(text)),
        tool_calls: None,
        tool_call_id: Some(tool_use_id),
        name: None,
    }
}

fn map_tool(tool: claude::Tool) -> openai::ChatTool {
    openai::ChatTool {
        kind: openai::ChatCompletionToolCallType::Function,
        function: openai::ChatToolFunction {
            name: tool.name,
            description: tool.description,
            parameters: Some(tool.input_schema),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_request(messages: Vec<claude::Message>) -> claude::MessagesRequest {
        claude::MessagesRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages,
            max_tokens: 100,
            system: None,
            stream: false,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let mut request = base_request(vec![claude::Message {
            role: claude::Role::User,
            content: claude::MessageContent::Text("hi".to_string()),
        }]);
        request.system = Some(claude::SystemPrompt::Text("be terse".to_string()));

        let converted = transform_request(request);
        assert_eq!(converted.messages[0].role, openai::ChatCompletionRole::System);
        assert!(matches!(
            &converted.messages[0].content,
            Some(openai::ChatMessageContent::Text(t)) if t == "be terse"
        ));
    }

    #[test]
    fn tool_use_block_becomes_tool_call() {
        let request = base_request(vec![claude::Message {
            role: claude::Role::Assistant,
            content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "sf"}),
            }]),
        }]);

        let converted = transform_request(request);
        let tool_calls = converted.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].id, "call_1");
        assert_eq!(tool_calls[0].function.name, "get_weather");
    }

    #[test]
    fn tool_result_block_becomes_standalone_tool_message() {
        let request = base_request(vec![claude::Message {
            role: claude::Role::User,
            content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolResult {
                tool_use_id: "call_1".to_string(),
                content: Some(claude::ToolResultContent::Text("72F".to_string())),
                is_error: false,
            }]),
        }]);

        let converted = transform_request(request);
        assert_eq!(converted.messages.len(), 1);
        assert_eq!(converted.messages[0].role, openai::ChatCompletionRole::Tool);
        assert_eq!(converted.messages[0].tool_call_id.as_deref(), Some("call_1"));
    }
}
