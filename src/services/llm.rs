use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

use crate::config::relay::RelayConfig;
use crate::modules::chat::model::GenerationRequest;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Missing API key")]
    MissingApiKey,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Prompt blocked: {0}")]
    Blocked(String),
}

/// Text fragments in generation order. Dropping the stream releases the
/// upstream connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Opens one streaming generation. An `Err` here means nothing was produced.
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, LlmError>;
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: SystemInstruction<'a>,
    generation_config: GenerationConfig,
}

impl<'a> From<&'a GenerationRequest> for GenerateContentRequest<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        Self {
            contents: request
                .turns
                .iter()
                .map(|turn| Content {
                    role: turn.role.as_str(),
                    parts: vec![TextPart { text: &turn.text }],
                })
                .collect(),
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: &request.system_instruction,
                }],
            },
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &RelayConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or(LlmError::MissingApiKey)?;

        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, LlmError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );

        tracing::debug!(model = %request.model, turns = request.turns.len(), "opening Gemini stream");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&GenerateContentRequest::from(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Gemini rejected the request");
            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                return Err(LlmError::ApiError(error_response.error.message));
            }
            return Err(LlmError::ApiError(format!("{}: {}", status, error_text)));
        }

        let mut bytes = response.bytes_stream();
        let fragments = async_stream::stream! {
            let mut parser = SseParser::default();
            loop {
                let (payloads, done) = match bytes.next().await {
                    Some(Ok(chunk)) => (parser.push(&chunk), false),
                    Some(Err(e)) => {
                        yield Err(LlmError::RequestError(e));
                        return;
                    }
                    None => (parser.finish(), true),
                };

                for payload in payloads {
                    match decode_event(&payload) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                if done {
                    break;
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}

/// Splits an SSE byte stream into `data` payloads, one per event.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.feed_line(line.trim_end_matches(|c| c == '\r' || c == '\n'), &mut events);
        }

        events
    }

    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();

        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.feed_line(line.trim_end_matches(|c| c == '\r' || c == '\n'), &mut events);
        }
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }

        events
    }

    fn feed_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
            return;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
}

fn decode_event(payload: &str) -> Result<Option<String>, LlmError> {
    let event: StreamEvent =
        serde_json::from_str(payload).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    if let Some(error) = event.error {
        return Err(LlmError::ApiError(error.message));
    }

    if event.candidates.is_empty() {
        if let Some(reason) = event.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::Blocked(reason));
        }
        return Ok(None);
    }

    let text: String = event
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    Ok(if text.is_empty() { None } else { Some(text) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::chat::model::{UpstreamRole, UpstreamTurn};
    use serde_json::json;

    #[test]
    fn parser_reassembles_events_split_across_chunks() {
        let mut parser = SseParser::default();
        let first = parser.push(b"data: {\"a\":");
        assert!(first.is_empty());

        let second = parser.push(b"1}\r\n\r\ndata: {\"b\":2}\n\n: keep-alive\n");
        assert_eq!(second, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);

        assert!(parser.finish().is_empty());
    }

    #[test]
    fn parser_flushes_unterminated_event_on_finish() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"data: {\"c\":3}").is_empty());
        assert_eq!(parser.finish(), vec!["{\"c\":3}".to_string()]);
    }

    #[test]
    fn decode_concatenates_text_parts_and_skips_thoughts() {
        let payload = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Hel"},
                    {"text": "lo"}
                ]}
            }]
        })
        .to_string();

        assert_eq!(decode_event(&payload).unwrap(), Some("Hello".to_string()));
    }

    #[test]
    fn decode_treats_usage_only_events_as_empty() {
        let payload = json!({"usageMetadata": {"totalTokenCount": 12}}).to_string();
        assert_eq!(decode_event(&payload).unwrap(), None);
    }

    #[test]
    fn decode_surfaces_errors_and_blocks() {
        let error = json!({"error": {"code": 429, "message": "quota exceeded"}}).to_string();
        assert!(matches!(decode_event(&error), Err(LlmError::ApiError(m)) if m == "quota exceeded"));

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string();
        assert!(matches!(decode_event(&blocked), Err(LlmError::Blocked(r)) if r == "SAFETY"));

        assert!(matches!(decode_event("not json"), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn request_body_uses_gemini_shape() {
        let request = GenerationRequest {
            model: "gemini-1.5-pro".to_string(),
            system_instruction: "persona".to_string(),
            turns: vec![
                UpstreamTurn { role: UpstreamRole::User, text: "hi".to_string() },
                UpstreamTurn { role: UpstreamRole::Model, text: "hello".to_string() },
            ],
            temperature: 0.5,
            max_output_tokens: 64,
        };

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]}
                ],
                "systemInstruction": {"parts": [{"text": "persona"}]},
                "generationConfig": {"temperature": 0.5, "maxOutputTokens": 64}
            })
        );
    }

    #[test]
    fn client_requires_credential() {
        assert!(matches!(
            GeminiClient::new(&RelayConfig::default()),
            Err(LlmError::MissingApiKey)
        ));
    }
}
