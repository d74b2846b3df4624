use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::modules::chat::{
    model::build_generation_request,
    schema::{AiModel, ErrorResponse, ModelInfo, ModelsResponse},
};
use crate::services::llm::{FragmentStream, LlmError};
use crate::AppState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

fn plain_text(status: StatusCode, message: String) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], message).into_response()
}

fn text_stream_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, LlmError>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"));
    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    if state.generator.is_some() {
        plain_text(StatusCode::OK, "chat endpoint ok".to_string())
    } else {
        plain_text(StatusCode::INTERNAL_SERVER_ERROR, "GOOGLE_API_KEY not set".to_string())
    }
}

pub async fn stream_completion(State(state): State<AppState>, body: Bytes) -> Result<Response, Response> {
    let generator = state.generator.clone().ok_or_else(|| {
        tracing::error!("chat request refused, GOOGLE_API_KEY not set");
        plain_text(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server missing GOOGLE_API_KEY".to_string(),
        )
    })?;

    // An unparseable body is treated like an empty one.
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let request = build_generation_request(&payload, &state.config).map_err(|e| {
        tracing::debug!(error = %e, "rejecting chat request");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e.to_string() }),
        )
            .into_response()
    })?;

    let model = request.model.clone();
    tracing::info!(model = %model, turns = request.turns.len(), "relaying chat request");

    let mut fragments = generator.stream(request).await.map_err(|e| {
        tracing::error!(model = %model, error = %e, "upstream call failed");
        plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    // Hold the status line until the first fragment so that an upstream that
    // fails immediately still produces a 500.
    let first = loop {
        match fragments.next().await {
            Some(Ok(text)) if text.is_empty() => continue,
            Some(Ok(text)) => break Some(text),
            Some(Err(e)) => {
                tracing::error!(model = %model, error = %e, "upstream failed before first fragment");
                return Err(plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
            }
            None => break None,
        }
    };

    Ok(text_stream_response(relay_body(first, fragments, model)))
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = AiModel::all()
        .into_iter()
        .map(|m| ModelInfo {
            id: m.as_str().to_string(),
            name: m.display_name().to_string(),
        })
        .collect();

    Json(ModelsResponse {
        default: state.config.default_model.clone(),
        models,
    })
}

/// Per-response bookkeeping. Dropped without `finish` means the body was
/// abandoned, which also drops the upstream stream.
struct RelayProgress {
    model: String,
    fragments: usize,
    bytes: usize,
    finished: bool,
}

impl RelayProgress {
    fn new(model: String) -> Self {
        Self {
            model,
            fragments: 0,
            bytes: 0,
            finished: false,
        }
    }

    fn record(&mut self, text: &str) {
        self.fragments += 1;
        self.bytes += text.len();
    }

    fn finish(&mut self) {
        self.finished = true;
        tracing::info!(
            model = %self.model,
            fragments = self.fragments,
            bytes = self.bytes,
            "chat stream complete"
        );
    }
}

impl Drop for RelayProgress {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                model = %self.model,
                fragments = self.fragments,
                "client disconnected, upstream stream released"
            );
        }
    }
}

fn relay_body(
    first: Option<String>,
    mut rest: FragmentStream,
    model: String,
) -> impl Stream<Item = Result<Bytes, LlmError>> + Send + 'static {
    async_stream::stream! {
        let mut progress = RelayProgress::new(model);

        let Some(first) = first else {
            progress.finish();
            return;
        };
        progress.record(&first);
        yield Ok(Bytes::from(first));

        while let Some(item) = rest.next().await {
            match item {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    progress.record(&text);
                    yield Ok(Bytes::from(text));
                }
                Err(e) => {
                    progress.finished = true;
                    tracing::error!(
                        model = %progress.model,
                        fragments = progress.fragments,
                        error = %e,
                        "upstream failed mid-stream, aborting response"
                    );
                    yield Err(e);
                    return;
                }
            }
        }

        progress.finish();
    }
}
