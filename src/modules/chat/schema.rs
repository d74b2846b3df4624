use serde::{Deserialize, Serialize};

use crate::modules::session::model::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiModel {
    #[serde(rename = "gemini-1.5-pro")]
    Pro,
    #[serde(rename = "gemini-1.5-flash")]
    Flash,
}

impl AiModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiModel::Pro => "gemini-1.5-pro",
            AiModel::Flash => "gemini-1.5-flash",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AiModel::Pro => "SHIMA 1.5 Pro",
            AiModel::Flash => "SHIMA 1.5 Flash",
        }
    }

    pub fn all() -> Vec<AiModel> {
        vec![AiModel::Pro, AiModel::Flash]
    }

    pub fn from_id(id: &str) -> Option<AiModel> {
        AiModel::all().into_iter().find(|m| m.as_str() == id)
    }
}

impl Default for AiModel {
    fn default() -> Self {
        AiModel::Pro
    }
}

/// One role-tagged turn as the client sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Body of `POST /chat`. The relay parses requests leniently from raw JSON;
/// this type is what the client serializes.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub default: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}
