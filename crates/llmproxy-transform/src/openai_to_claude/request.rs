//! OpenAI Chat Completions request -> Anthropic Messages request.
//!
//! Used by the conversion-roundtrip property (`anthropic -> openai ->
//! anthropic`) rather than the live request path: a client only ever speaks
//! Anthropic to this proxy, so a genuine OpenAI request never needs to become
//! an Anthropic one in production. Kept symmetric with
//! [`crate::claude_to_openai::request`] regardless.

use serde_json::Value;

use llmproxy_protocol::claude::types as claude;
use llmproxy_protocol::openai::types as openai;

pub fn transform_request(request: openai::ChatCompletionRequest) -> claude::MessagesRequest {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in request.messages {
        match message.role {
            openai::ChatCompletionRole::System => {
                if let Some(text) = content_text(message.content) {
                    system_parts.push(text);
                }
            }
            openai::ChatCompletionRole::User => {
                messages.push(claude::Message {
                    role: claude::Role::User,
                    content: claude::MessageContent::Blocks(user_blocks(message.content)),
                });
            }
            openai::ChatCompletionRole::Assistant => {
                messages.push(claude::Message {
                    role: claude::Role::Assistant,
                    content: claude::MessageContent::Blocks(assistant_blocks(
                        message.content,
                        message.tool_calls,
                    )),
                });
            }
            openai::ChatCompletionRole::Tool => {
                let tool_use_id = message.tool_call_id.unwrap_or_default();
                let text = content_text(message.content).unwrap_or_default();
                messages.push(claude::Message {
                    role: claude::Role::User,
                    content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolResult {
                        tool_use_id,
                        content: Some(claude::ToolResultContent::Text(text)),
                        is_error: false,
                    }]),
                });
            }
        }
    }

    claude::MessagesRequest {
        model: request.model,
        messages,
        max_tokens: request.max_tokens.unwrap_or(4096),
        system: if system_parts.is_empty() {
            None
        } else {
            Some(claude::SystemPrompt::Text(system_parts.join("\n")))
        },
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop,
        tools: request.tools.map(|tools| tools.into_iter().map(map_tool).collect()),
        tool_choice: request.tool_choice,
        extra: serde_json::Map::new(),
    }
}

fn content_text(content: Option<openai::ChatMessageContent>) -> Option<String> {
    match content? {
        openai::ChatMessageContent::Text(text) => Some(text),
        openai::ChatMessageContent::Parts(parts) => {
            let text = parts
                .into_iter()
                .filter_map(|part| match part {
                    openai::ChatMessagePart::Text { text } => Some(text),
                    openai::ChatMessagePart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(text)
        }
    }
}

fn user_blocks(content: Option<openai::ChatMessageContent>) -> Vec<claude::ContentBlock> {
    match content {
        None => Vec::new(),
        Some(openai::ChatMessageContent::Text(text)) => vec![claude::ContentBlock::Text { text }],
        Some(openai::ChatMessageContent::Parts(parts)) => {
            parts.into_iter().map(map_part).collect()
        }
    }
}

fn map_part(part: openai::ChatMessagePart) -> claude::ContentBlock {
    match part {
        openai::ChatMessagePart::Text { text } => claude::ContentBlock::Text { text },
        openai::ChatMessagePart::ImageUrl { image_url } => {
            claude::ContentBlock::Image {
                source: decode_image_url(&image_url.url),
            }
        }
    }
}

fn decode_image_url(url: &str) -> claude::ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return claude::ImageSource {
                kind: "base64".to_string(),
                media_type: Some(media_type.to_string()),
                data: Some(data.to_string()),
                url: None,
            };
        }
    }
    claude::ImageSource {
        kind: "url".to_string(),
        media_type: None,
        data: None,
        url: Some(url.to_string()),
    }
}

fn assistant_blocks(
    content: Option<openai::ChatMessageContent>,
    tool_calls: Option<Vec<openai::ChatCompletionMessageToolCall>>,
) -> Vec<claude::ContentBlock> {
    let mut blocks = Vec::new();
    if let Some(text) = content_text(content) {
        if !text.is_empty() {
            blocks.push(claude::ContentBlock::Text { text });
        }
    }
    for call in tool_calls.into_iter().flatten() {
        let input: Value =
            serde_json::from_str(&call.function.arguments).unwrap_or(Value::Object(Default::default()));
        blocks.push(claude::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }
    blocks
}

fn map_tool(tool: openai::ChatTool) -> claude::Tool {
    claude::Tool {
        name: tool.function.name,
        description: tool.function.description,
        input_schema: tool.function.parameters.unwrap_or(Value::Object(Default::default())),
    }
}
