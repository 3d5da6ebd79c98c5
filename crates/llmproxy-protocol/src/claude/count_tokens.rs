use serde::{Deserialize, Serialize};

use super::types::{Message, SystemPrompt, Tool};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountTokensRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CountTokensResponse {
    pub input_tokens: u32,
}
