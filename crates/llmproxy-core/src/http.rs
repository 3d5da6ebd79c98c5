//! The `axum` HTTP surface (§4.8, ambient): `/v1/messages`,
//! `/v1/messages/count_tokens`, and `/providers`, wired to a shared
//! [`AppState`]. Request-level logging mirrors a production reverse
//! proxy's access log: `downstream_received`/`downstream_responded` at
//! `info`, upstream-attempt failures at `warn` (the latter logged deeper in
//! [`crate::lifecycle`]).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use llmproxy_protocol::claude::count_tokens::CountTokensRequest;
use llmproxy_protocol::claude::error::ErrorBody;
use llmproxy_protocol::claude::types::MessagesRequest;
use llmproxy_protocol::sse::encode_frame;

use crate::broadcaster::{SessionMessage, SessionOutcome};
use crate::lifecycle::{CountTokensOutcome, LifecycleError, MessagesOutcome, StreamDelivery};
use crate::state::AppState;
use crate::token_counter;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/providers", get(providers))
        .with_state(state)
}

async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MessagesRequest>,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let started_at = Instant::now();
    let is_stream = request.stream;
    let model = request.model.clone();

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        model = %model,
        is_stream,
        "received /v1/messages request"
    );

    let config = state.global.load_full();
    let outcome = state
        .lifecycle
        .handle_messages(&config, request, headers)
        .await;

    match outcome {
        Ok(MessagesOutcome::NonStreaming(response)) => {
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                model = %model,
                status = 200,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = false,
                "completed /v1/messages request"
            );
            Json(response).into_response()
        }
        Ok(MessagesOutcome::Streaming(subscriber)) => {
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                model = %model,
                status = 200,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = true,
                "started /v1/messages stream"
            );
            stream_response(subscriber)
        }
        Err(err) => {
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                model = %model,
                status = err.kind.client_status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis(),
                error = err.kind.as_str(),
                "failed /v1/messages request"
            );
            error_response(err)
        }
    }
}

/// Builds the `text/event-stream` response body from a broadcaster
/// subscriber, translating each delivered [`SessionMessage`] into an SSE
/// frame. A mid-stream failure (§7 `StreamAbortedMidFlight`) is surfaced as
/// an `error` SSE event rather than truncating the HTTP response silently.
fn stream_response(delivery: StreamDelivery) -> Response {
    let stream = futures_util::stream::unfold(Some(delivery), move |state| async move {
        let mut sub = state?;
        match sub.recv().await {
            Some(SessionMessage::Frame(frame)) => {
                let event = frame.event.as_deref();
                let data = String::from_utf8_lossy(&frame.data).into_owned();
                Some((encode_frame(event, &data).into_bytes(), Some(sub)))
            }
            Some(SessionMessage::Terminal(SessionOutcome::Completed)) => {
                sub.detach().await;
                None
            }
            Some(SessionMessage::Terminal(SessionOutcome::Failed(message))) => {
                let body = ErrorBody::new("stream_aborted_mid_flight", message.to_string());
                let data = serde_json::to_string(&body).unwrap_or_default();
                let frame = encode_frame(Some("error"), &data).into_bytes();
                sub.detach().await;
                Some((frame, None))
            }
            None => None,
        }
    });

    let body = Body::from_stream(stream.map(Ok::<_, std::convert::Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CountTokensRequest>,
) -> Response {
    let config = state.global.load_full();
    let encoder = state.encoder.clone();
    let request_for_estimate = request.clone();
    let outcome = state
        .lifecycle
        .count_tokens(&config, &request, &headers, || {
            token_counter::estimate(&encoder, &request_for_estimate)
        })
        .await;

    let response = match outcome {
        CountTokensOutcome::Upstream(response) => response,
        CountTokensOutcome::Estimated(response) => response,
    };
    Json(response).into_response()
}

#[derive(Serialize)]
struct ProviderSummary {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    healthy: bool,
    account_email: Option<String>,
}

async fn providers(State(state): State<Arc<AppState>>) -> Response {
    let mut summaries = Vec::new();
    let mut healthy_count = 0usize;
    for provider in state.pool.all() {
        let healthy = state.pool.is_healthy(provider.id).await;
        if healthy {
            healthy_count += 1;
        }
        summaries.push(ProviderSummary {
            name: provider.name.clone(),
            kind: if provider.is_anthropic() {
                "anthropic"
            } else {
                "openai"
            },
            healthy,
            account_email: provider.account_email.clone(),
        });
    }

    Json(json!({
        "providers": summaries,
        "healthy_providers": healthy_count,
    }))
    .into_response()
}

fn error_response(err: LifecycleError) -> Response {
    let status = err.kind.client_status();
    let body = ErrorBody::new(err.kind.as_str(), err.message);
    (status, Json(body)).into_response()
}
