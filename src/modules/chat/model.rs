use serde_json::Value;
use thiserror::Error;

use crate::config::relay::RelayConfig;
use crate::modules::chat::schema::AiModel;

/// Persona attached to every generation as the system instruction.
pub const PERSONA: &str = "あなたは丁寧でわかりやすい日本語アシスタントSHIMAです。\
短い段落と箇条書きを使い、詰まりすぎないよう適度に改行してください。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamRole {
    User,
    Model,
}

impl UpstreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamRole::User => "user",
            UpstreamRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTurn {
    pub role: UpstreamRole,
    pub text: String,
}

/// Everything the generator needs for one streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub turns: Vec<UpstreamTurn>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Error, Debug, PartialEq)]
pub enum RequestError {
    #[error("Invalid body. messages[] required.")]
    NoValidTurns,
}

/// Turns a raw `POST /chat` body into a generation request.
///
/// `body` is whatever JSON arrived; anything that is not an object is
/// treated as an empty one.
pub fn build_generation_request(body: &Value, config: &RelayConfig) -> Result<GenerationRequest, RequestError> {
    let turns = translate_turns(body.get("messages"));
    if turns.is_empty() {
        return Err(RequestError::NoValidTurns);
    }

    let model = resolve_model(body.get("model"), config);

    let temperature = body
        .get("temperature")
        .and_then(Value::as_f64)
        .map(|t| t as f32)
        .filter(|t| t.is_finite())
        .unwrap_or(config.temperature);

    let max_output_tokens = body
        .get("maxTokens")
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| n.round().min(u32::MAX as f64) as u32)
        .unwrap_or(config.max_tokens);

    Ok(GenerationRequest {
        model,
        system_instruction: PERSONA.to_string(),
        turns,
        temperature,
        max_output_tokens,
    })
}

/// Keeps `user`/`assistant` entries with non-empty string content, in order,
/// mapping `assistant` to the upstream `model` role.
pub fn translate_turns(messages: Option<&Value>) -> Vec<UpstreamTurn> {
    let Some(Value::Array(items)) = messages else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let role = match item.get("role").and_then(Value::as_str)? {
                "user" => UpstreamRole::User,
                "assistant" => UpstreamRole::Model,
                _ => return None,
            };
            let text = item.get("content").and_then(Value::as_str)?;
            if text.is_empty() {
                return None;
            }
            Some(UpstreamTurn {
                role,
                text: text.to_string(),
            })
        })
        .collect()
}

/// Unknown ids fall back to the configured default.
fn resolve_model(raw: Option<&Value>, config: &RelayConfig) -> String {
    let requested = raw
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty());

    match requested {
        None => config.default_model.clone(),
        Some(id) if AiModel::from_id(id).is_some() || id == config.default_model => id.to_string(),
        Some(id) => {
            tracing::warn!(requested = id, fallback = %config.default_model, "unknown model id, using default");
            config.default_model.clone()
        }
    }
}
