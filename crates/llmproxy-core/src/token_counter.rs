//! The local token estimate (§4.7 step 2): a deterministic, cheap fallback
//! for when no upstream anthropic provider can serve the native counter.
//! Encodes with a shared `cl100k_base` [`CoreBPE`] built once at startup and
//! injected in, rather than re-parsed per request (§9 "Globals").

use tiktoken_rs::CoreBPE;

use llmproxy_protocol::claude::count_tokens::CountTokensRequest;
use llmproxy_protocol::claude::types::ContentBlock;

/// Fixed per-image estimate: images never go through the text encoder, and
/// providers don't expose pixel-accurate costs through a stable public API.
const IMAGE_TOKEN_ESTIMATE: u32 = 768;

pub fn build_encoder() -> anyhow::Result<CoreBPE> {
    tiktoken_rs::cl100k_base().map_err(|err| anyhow::anyhow!("load cl100k_base encoder: {err}"))
}

/// Sums an approximate token count over `request`'s system prompt, messages,
/// and tool definitions. Never exact — the point is a cheap, deterministic
/// upper-ish bound good enough to drive client-side context budgeting.
pub fn estimate(encoder: &CoreBPE, request: &CountTokensRequest) -> u32 {
    let mut total = 0u32;

    if let Some(system) = &request.system {
        total += count_text(encoder, &system.as_text());
    }

    for message in &request.messages {
        for block in message.content.as_blocks() {
            total += count_block(encoder, &block);
        }
    }

    for tool in request.tools.iter().flatten() {
        let mut header = tool.name.clone();
        if let Some(description) = &tool.description {
            header.push_str(description);
        }
        total += count_text(encoder, &header);
        total += count_text(encoder, &tool.input_schema.to_string());
    }

    total
}

fn count_block(encoder: &CoreBPE, block: &ContentBlock) -> u32 {
    match block {
        ContentBlock::Text { text } => count_text(encoder, text),
        ContentBlock::Thinking { thinking, .. } => count_text(encoder, thinking),
        ContentBlock::Image { .. } => IMAGE_TOKEN_ESTIMATE,
        ContentBlock::ToolUse { input, .. } => count_text(encoder, &input.to_string()),
        ContentBlock::ToolResult { content, .. } => {
            count_text(encoder, &content.as_ref().map(|c| c.as_text()).unwrap_or_default())
        }
    }
}

fn count_text(encoder: &CoreBPE, text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    encoder.encode_with_special_tokens(text).len() as u32
}
