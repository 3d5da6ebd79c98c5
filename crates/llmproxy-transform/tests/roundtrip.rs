//! P7: for every message representable in both schemas,
//! `anthropic -> openai -> anthropic` must equal the original up to
//! documented field renames (e.g. `stop_reason` <-> `finish_reason`).
//! Exercises the four conversion functions together rather than each in
//! isolation, the way the individual `#[cfg(test)]` modules next to each
//! of them do.

use serde_json::json;

use llmproxy_protocol::claude::types as claude;
use llmproxy_transform::claude_to_openai;
use llmproxy_transform::openai_to_claude;

fn assert_blocks_equivalent(original: &[claude::ContentBlock], roundtripped: &[claude::ContentBlock]) {
    assert_eq!(
        original.len(),
        roundtripped.len(),
        "block count changed across the roundtrip: {original:?} vs {roundtripped:?}"
    );
    for (a, b) in original.iter().zip(roundtripped.iter()) {
        match (a, b) {
            (claude::ContentBlock::Text { text: t1 }, claude::ContentBlock::Text { text: t2 }) => {
                assert_eq!(t1, t2);
            }
            (
                claude::ContentBlock::ToolUse {
                    id: id1,
                    name: name1,
                    input: input1,
                },
                claude::ContentBlock::ToolUse {
                    id: id2,
                    name: name2,
                    input: input2,
                },
            ) => {
                assert_eq!(id1, id2);
                assert_eq!(name1, name2);
                assert_eq!(input1, input2);
            }
            (
                claude::ContentBlock::ToolResult {
                    tool_use_id: id1, ..
                },
                claude::ContentBlock::ToolResult {
                    tool_use_id: id2, ..
                },
            ) => {
                assert_eq!(id1, id2);
            }
            other => panic!("block shape changed across the roundtrip: {other:?}"),
        }
    }
}

#[test]
fn text_message_roundtrips_through_openai() {
    let request = claude::MessagesRequest {
        model: "claude-3-5-sonnet-20241022".to_string(),
        messages: vec![claude::Message {
            role: claude::Role::User,
            content: claude::MessageContent::Blocks(vec![claude::ContentBlock::Text {
                text: "what's the weather in sf?".to_string(),
            }]),
        }],
        max_tokens: 256,
        system: Some(claude::SystemPrompt::Text("be terse".to_string())),
        stream: false,
        temperature: Some(0.5),
        top_p: None,
        stop_sequences: None,
        tools: None,
        tool_choice: None,
        extra: serde_json::Map::new(),
    };

    let openai_request = claude_to_openai::request::transform_request(request.clone());
    let roundtripped = openai_to_claude::request::transform_request(openai_request);

    assert_eq!(roundtripped.model, request.model);
    assert_eq!(
        roundtripped.system.unwrap().as_text(),
        request.system.unwrap().as_text()
    );
    assert_eq!(roundtripped.temperature, request.temperature);
    assert_eq!(roundtripped.messages.len(), request.messages.len());
    assert_blocks_equivalent(
        &request.messages[0].content.as_blocks(),
        &roundtripped.messages[0].content.as_blocks(),
    );
}

#[test]
fn tool_use_and_tool_result_messages_roundtrip_through_openai() {
    let request = claude::MessagesRequest {
        model: "claude-3-5-sonnet-20241022".to_string(),
        messages: vec![
            claude::Message {
                role: claude::Role::Assistant,
                content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({"city": "sf"}),
                }]),
            },
            claude::Message {
                role: claude::Role::User,
                content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolResult {
                    tool_use_id: "call_1".to_string(),
                    content: Some(claude::ToolResultContent::Text("57F and foggy".to_string())),
                    is_error: false,
                }]),
            },
        ],
        max_tokens: 256,
        system: None,
        stream: false,
        temperature: None,
        top_p: None,
        stop_sequences: None,
        tools: Some(vec![claude::Tool {
            name: "get_weather".to_string(),
            description: Some("look up the weather for a city".to_string()),
            input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }]),
        tool_choice: None,
        extra: serde_json::Map::new(),
    };

    let openai_request = claude_to_openai::request::transform_request(request.clone());
    let roundtripped = openai_to_claude::request::transform_request(openai_request);

    assert_eq!(roundtripped.messages.len(), request.messages.len());
    for (original, roundtripped) in request.messages.iter().zip(roundtripped.messages.iter()) {
        assert_blocks_equivalent(&original.content.as_blocks(), &roundtripped.content.as_blocks());
    }

    let original_tools = request.tools.unwrap();
    let roundtripped_tools = roundtripped.tools.unwrap();
    assert_eq!(roundtripped_tools.len(), original_tools.len());
    assert_eq!(roundtripped_tools[0].name, original_tools[0].name);
    assert_eq!(roundtripped_tools[0].input_schema, original_tools[0].input_schema);
}

#[test]
fn text_response_roundtrips_through_openai() {
    let response = claude::MessagesResponse {
        id: "msg_1".to_string(),
        kind: "message".to_string(),
        role: claude::Role::Assistant,
        model: "claude-3-5-sonnet-20241022".to_string(),
        content: vec![claude::ContentBlock::Text {
            text: "it's 57F and foggy".to_string(),
        }],
        stop_reason: Some(claude::StopReason::EndTurn),
        stop_sequence: None,
        usage: claude::Usage {
            input_tokens: 12,
            output_tokens: 6,
        },
    };

    let openai_response = claude_to_openai::response::transform_response(response.clone(), 0);
    let roundtripped = openai_to_claude::response::transform_response(openai_response);

    assert_eq!(roundtripped.id, response.id);
    assert_eq!(roundtripped.model, response.model);
    assert_eq!(roundtripped.stop_reason, response.stop_reason);
    assert_eq!(roundtripped.usage.input_tokens, response.usage.input_tokens);
    assert_eq!(roundtripped.usage.output_tokens, response.usage.output_tokens);
    assert_blocks_equivalent(&response.content, &roundtripped.content);
}

#[test]
fn tool_use_response_roundtrips_through_openai() {
    let response = claude::MessagesResponse {
        id: "msg_2".to_string(),
        kind: "message".to_string(),
        role: claude::Role::Assistant,
        model: "claude-3-5-sonnet-20241022".to_string(),
        content: vec![claude::ContentBlock::ToolUse {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            input: json!({"city": "sf"}),
        }],
        stop_reason: Some(claude::StopReason::ToolUse),
        stop_sequence: None,
        usage: claude::Usage {
            input_tokens: 4,
            output_tokens: 2,
        },
    };

    let openai_response = claude_to_openai::response::transform_response(response.clone(), 0);
    let roundtripped = openai_to_claude::response::transform_response(openai_response);

    assert_eq!(roundtripped.stop_reason, response.stop_reason);
    assert_blocks_equivalent(&response.content, &roundtripped.content);
}
