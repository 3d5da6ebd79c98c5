//! The request lifecycle / failover engine (§4.6): fingerprint the request,
//! check the dedup broadcaster, walk the router's candidate list with
//! per-attempt auth resolution and format conversion, and either return a
//! buffered response or drive a streaming publish loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use tracing::warn;

use llmproxy_common::{GlobalConfig, ProviderType, SelectionStrategy};
use llmproxy_protocol::claude::count_tokens::{CountTokensRequest, CountTokensResponse};
use llmproxy_protocol::claude::stream::StreamEventKnown;
use llmproxy_protocol::claude::types::MessagesRequest;
use llmproxy_protocol::claude::types::MessagesResponse;
use llmproxy_protocol::openai::stream::ChatCompletionChunk;
use llmproxy_protocol::openai::types::ChatCompletionResponse;
use llmproxy_protocol::sse::SseParser;
use llmproxy_provider_core::auth::AuthResolver;
use llmproxy_provider_core::errors::ErrorKind;
use llmproxy_provider_core::fingerprint::fingerprint;
use llmproxy_provider_core::oauth::OAuthStore;
use llmproxy_provider_core::pool::ProviderPool;
use llmproxy_provider_core::provider::{Provider, ProviderId};
use llmproxy_provider_core::router::Router;
use llmproxy_transform::claude_to_openai;
use llmproxy_transform::openai_to_claude;

use crate::broadcaster::{
    DedupBroadcaster, Frame, Role, Session, SessionMessage, SessionOutcome, Subscriber,
};
use crate::upstream_client::{
    AttemptTimeouts, UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamTransportError,
};

const TRUNCATED_BODY_LIMIT: usize = 500;

/// An error surfaced to the HTTP layer, carrying everything §7 asks the
/// client-facing error body to carry.
#[derive(Debug, Clone)]
pub struct LifecycleError {
    pub kind: ErrorKind,
    pub message: String,
    pub upstream_body: Option<String>,
}

impl LifecycleError {
    fn local(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            upstream_body: None,
        }
    }

    fn upstream(kind: ErrorKind, message: impl Into<String>, body: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            upstream_body: body,
        }
    }
}

pub enum MessagesOutcome {
    NonStreaming(MessagesResponse),
    Streaming(StreamDelivery),
}

/// Wraps a subscriber with the one-shot fallback §4.5 `fail` requires: if
/// the session fails before this subscriber was ever handed a frame, it has
/// not shown its client anything yet and can silently run its own
/// independent attempt over the same candidate list instead of surfacing
/// the error. A subscriber that already received output cannot take this
/// path — the client has partial content, so the error must be reported
/// mid-stream rather than retried invisibly.
pub struct StreamDelivery {
    subscriber: Subscriber,
    retry: Option<RetryContext>,
}

struct RetryContext {
    engine: RequestLifecycle,
    candidates: Vec<(Provider, String)>,
    request: MessagesRequest,
    original_headers: HeaderMap,
}

impl StreamDelivery {
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        loop {
            match self.subscriber.recv().await {
                Some(SessionMessage::Terminal(SessionOutcome::Failed(_)))
                    if !self.subscriber.delivered_any() && self.retry.is_some() =>
                {
                    let retry = self.retry.take().expect("checked Some above");
                    let standalone = retry.engine.broadcaster.standalone_session();
                    let fresh = standalone
                        .subscribe()
                        .await
                        .expect("a freshly created session always has room for its first subscriber");
                    retry.engine.spawn_stream_producer(
                        retry.candidates,
                        retry.request,
                        retry.original_headers,
                        standalone,
                    );
                    self.subscriber = fresh;
                    // This one fallback attempt is the only one §4.5 grants;
                    // if it also fails with no frames delivered, surface the
                    // error rather than retry forever.
                }
                other => return other,
            }
        }
    }

    pub async fn detach(self) {
        self.subscriber.detach().await;
    }
}

pub enum CountTokensOutcome {
    Upstream(CountTokensResponse),
    Estimated(CountTokensResponse),
}

/// Owns nothing that outlives a request except `Arc`-shared collaborators;
/// cheap to clone and hand to a spawned publish-loop task.
#[derive(Clone)]
pub struct RequestLifecycle {
    pool: Arc<ProviderPool>,
    router: Arc<Router>,
    oauth: Arc<dyn OAuthStore>,
    broadcaster: Arc<DedupBroadcaster>,
    upstream: Arc<dyn UpstreamClient>,
}

impl RequestLifecycle {
    pub fn new(
        pool: Arc<ProviderPool>,
        router: Arc<Router>,
        oauth: Arc<dyn OAuthStore>,
        broadcaster: Arc<DedupBroadcaster>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            pool,
            router,
            oauth,
            broadcaster,
            upstream,
        }
    }

    /// Resolves `model` through the Router, then reorders the result per
    /// the configured selection strategy, returning owned candidates (we
    /// clone `Provider` rather than carry borrows across the task spawn
    /// boundary the streaming path needs).
    async fn resolve_candidates(
        &self,
        config: &GlobalConfig,
        model: &str,
    ) -> Result<Vec<(Provider, String)>, LifecycleError> {
        let routed = self
            .router
            .candidates_for_model(&self.pool, model)
            .map_err(|_| {
                LifecycleError::local(
                    ErrorKind::ModelNotRouted,
                    format!("no route configured for model {model:?}"),
                )
            })?;

        let upstream_model_by_id: HashMap<ProviderId, String> =
            routed.iter().map(|(p, m)| (p.id, m.clone())).collect();
        let providers: Vec<&Provider> = routed.iter().map(|(p, _)| *p).collect();
        let ordered = self
            .pool
            .ordered_candidates(config.selection_strategy, &providers)
            .await;

        Ok(ordered
            .into_iter()
            .map(|p| {
                let upstream_model = upstream_model_by_id
                    .get(&p.id)
                    .cloned()
                    .unwrap_or_else(|| model.to_string());
                (p.clone(), upstream_model)
            })
            .collect())
    }

    pub async fn handle_messages(
        &self,
        config: &GlobalConfig,
        request: MessagesRequest,
        original_headers: HeaderMap,
    ) -> Result<MessagesOutcome, LifecycleError> {
        let candidates = self.resolve_candidates(config, &request.model).await?;

        if !request.stream {
            let response = self
                .attempt_non_streaming(candidates, request, original_headers)
                .await?;
            return Ok(MessagesOutcome::NonStreaming(response));
        }

        let body_value = fingerprint_key_value(&request)
            .map_err(|err| LifecycleError::local(ErrorKind::ClientRequestError, err.to_string()))?;
        let fp = fingerprint(&body_value);
        let (session, role) = self.broadcaster.attach(&fp).await;

        match session.subscribe().await {
            Ok(subscriber) => {
                let retry = if role == Role::Subscriber {
                    Some(RetryContext {
                        engine: self.clone(),
                        candidates,
                        request,
                        original_headers,
                    })
                } else {
                    self.spawn_stream_producer(candidates, request, original_headers, session);
                    None
                };
                Ok(MessagesOutcome::Streaming(StreamDelivery { subscriber, retry }))
            }
            Err(_buffer_exceeded) => {
                let standalone = self.broadcaster.standalone_session();
                let subscriber = standalone
                    .subscribe()
                    .await
                    .expect("a freshly created session always has room for its first subscriber");
                self.spawn_stream_producer(candidates, request, original_headers, standalone);
                Ok(MessagesOutcome::Streaming(StreamDelivery {
                    subscriber,
                    retry: None,
                }))
            }
        }
    }

    fn spawn_stream_producer(
        &self,
        candidates: Vec<(Provider, String)>,
        request: MessagesRequest,
        original_headers: HeaderMap,
        session: Arc<Session>,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .run_stream_attempts(candidates, request, original_headers, session)
                .await;
        });
    }

    /// The non-streaming attempt loop (§4.6, `success-nonstream` branch):
    /// tries each candidate in order, converting and auth-resolving per
    /// attempt, stopping at the first success or the first non-retryable
    /// failure.
    async fn attempt_non_streaming(
        &self,
        candidates: Vec<(Provider, String)>,
        request: MessagesRequest,
        original_headers: HeaderMap,
    ) -> Result<MessagesResponse, LifecycleError> {
        if candidates.is_empty() {
            return Err(LifecycleError::local(
                ErrorKind::AllProvidersExhausted,
                "every candidate for this model is currently in cooldown",
            ));
        }

        let mut last_error = None;
        let total = candidates.len();

        for (index, (provider, upstream_model)) in candidates.into_iter().enumerate() {
            match self
                .try_one_non_streaming(&provider, &upstream_model, &request, &original_headers)
                .await
            {
                Ok(response) => {
                    self.pool.mark_success(provider.id).await;
                    return Ok(response);
                }
                Err(err) => {
                    if err.kind.counts_against_health() {
                        self.pool.mark_failure(provider.id).await;
                    }
                    warn!(
                        provider = provider.name,
                        attempt = index + 1,
                        total,
                        error = err.kind.as_str(),
                        "upstream attempt failed"
                    );
                    let retryable = err.kind.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LifecycleError::local(ErrorKind::AllProvidersExhausted, "no candidates attempted")
        }))
    }

    async fn try_one_non_streaming(
        &self,
        provider: &Provider,
        upstream_model: &str,
        request: &MessagesRequest,
        original_headers: &HeaderMap,
    ) -> Result<MessagesResponse, LifecycleError> {
        let headers = AuthResolver::new(self.oauth.as_ref())
            .resolve(provider, original_headers)
            .await
            .map_err(|_| {
                LifecycleError::local(
                    ErrorKind::OAuthUnavailable,
                    format!("no oauth token available for provider {}", provider.name),
                )
            })?;

        let mut scoped_request = request.clone();
        scoped_request.model = upstream_model.to_string();
        scoped_request.stream = false;

        let (url, body) = build_wire_request(provider, &scoped_request)?;

        let upstream_req = UpstreamRequest {
            method: http::Method::POST,
            url,
            headers,
            body,
            stream: false,
            proxy: provider.proxy.clone(),
            timeouts: AttemptTimeouts::default(),
        };

        let response = self
            .upstream
            .send(upstream_req)
            .await
            .map_err(transport_error_to_lifecycle)?;

        let body_bytes = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut rx) => drain_stream_body(&mut rx).await,
        };

        if !response.status.is_success() {
            let truncated = truncate_body(&body_bytes);
            return Err(LifecycleError::upstream(
                ErrorKind::from_status(response.status),
                format!("upstream returned {}", response.status),
                Some(truncated),
            ));
        }

        decode_non_streaming_response(provider, &body_bytes)
    }

    /// The streaming attempt loop, run as a detached task for the
    /// initiating request: publishes frames into `session` as they arrive
    /// and calls `complete`/`fail` on the session when the stream ends.
    /// Failover between candidates is only possible before the first byte
    /// of a successful response arrives — once frames have been published,
    /// a mid-stream drop is `StreamAbortedMidFlight`, surfaced to
    /// subscribers rather than silently retried on a new candidate (§4.6
    /// "Cancellation").
    async fn run_stream_attempts(
        &self,
        candidates: Vec<(Provider, String)>,
        request: MessagesRequest,
        original_headers: HeaderMap,
        session: Arc<Session>,
    ) {
        if candidates.is_empty() {
            session
                .complete(SessionOutcome::Failed(Arc::from(
                    "every candidate for this model is currently in cooldown",
                )))
                .await;
            return;
        }

        let mut last_error: Option<LifecycleError> = None;
        let total = candidates.len();

        for (index, (provider, upstream_model)) in candidates.into_iter().enumerate() {
            if session.subscriber_count().await == 0 {
                return;
            }

            match self
                .try_one_streaming(&provider, &upstream_model, &request, &original_headers, &session)
                .await
            {
                Ok(StreamResult::Completed) => {
                    self.pool.mark_success(provider.id).await;
                    session.complete(SessionOutcome::Completed).await;
                    return;
                }
                Ok(StreamResult::AbortedMidFlight(message)) => {
                    self.pool.mark_failure(provider.id).await;
                    session
                        .complete(SessionOutcome::Failed(Arc::from(message.as_str())))
                        .await;
                    return;
                }
                Err(err) => {
                    if err.kind.counts_against_health() {
                        self.pool.mark_failure(provider.id).await;
                    }
                    warn!(
                        provider = provider.name,
                        attempt = index + 1,
                        total,
                        error = err.kind.as_str(),
                        "upstream stream attempt failed before any frame"
                    );
                    let retryable = err.kind.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "all providers exhausted".to_string());
        session.complete(SessionOutcome::Failed(Arc::from(message.as_str()))).await;
    }

    async fn try_one_streaming(
        &self,
        provider: &Provider,
        upstream_model: &str,
        request: &MessagesRequest,
        original_headers: &HeaderMap,
        session: &Arc<Session>,
    ) -> Result<StreamResult, LifecycleError> {
        let headers = AuthResolver::new(self.oauth.as_ref())
            .resolve(provider, original_headers)
            .await
            .map_err(|_| {
                LifecycleError::local(
                    ErrorKind::OAuthUnavailable,
                    format!("no oauth token available for provider {}", provider.name),
                )
            })?;

        let mut scoped_request = request.clone();
        scoped_request.model = upstream_model.to_string();
        scoped_request.stream = true;

        let (url, body) = build_wire_request(provider, &scoped_request)?;

        let upstream_req = UpstreamRequest {
            method: http::Method::POST,
            url,
            headers,
            body,
            stream: true,
            proxy: provider.proxy.clone(),
            timeouts: AttemptTimeouts::default(),
        };

        let response = self
            .upstream
            .send(upstream_req)
            .await
            .map_err(transport_error_to_lifecycle)?;

        if !response.status.is_success() {
            let body_bytes = match response.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(mut rx) => drain_stream_body(&mut rx).await,
            };
            let truncated = truncate_body(&body_bytes);
            return Err(LifecycleError::upstream(
                ErrorKind::from_status(response.status),
                format!("upstream returned {}", response.status),
                Some(truncated),
            ));
        }

        let mut rx = match response.body {
            UpstreamBody::Stream(rx) => rx,
            UpstreamBody::Bytes(bytes) => {
                // A non-chunked 2xx body for a streaming request: treat the
                // whole payload as a single chunk through the same parser.
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let _ = tx.send(Ok(bytes)).await;
                rx
            }
        };

        let mut parser = SseParser::new();
        let mut openai_state = openai_to_claude::stream::OpenAiToClaudeStreamState::new();
        let is_anthropic = provider.is_anthropic();
        let mut published_any = false;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = session.all_detached.notified() => {
                    // Every subscriber (including the original initiator)
                    // detached while we were waiting on the next upstream
                    // chunk: stop reading rather than block on a stream
                    // nobody is left to receive (§4.5 `detach`, §5
                    // cancellation). Dropping `rx` here closes our end of
                    // the upstream response body.
                    return Ok(StreamResult::Completed);
                }
                chunk = rx.recv() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(_transport_err)) => {
                    return if published_any {
                        Ok(StreamResult::AbortedMidFlight(
                            "upstream connection dropped mid-stream".to_string(),
                        ))
                    } else {
                        Err(LifecycleError::local(
                            ErrorKind::NetworkError,
                            "upstream connection dropped before any frame",
                        ))
                    };
                }
                None => {
                    // Upstream closed the connection without a final chunk
                    // carrying `finish_reason` (OpenAI normally always sends
                    // one before EOF, but a clean early close is still
                    // observable). Flush whatever `message_delta`/
                    // `message_stop` the Claude-shaped stream still owes its
                    // subscribers rather than leaving the session to finish
                    // silently without its required terminal frame.
                    if !is_anthropic {
                        for claude_event in openai_state.finish() {
                            let is_stop = matches!(claude_event, StreamEventKnown::MessageStop);
                            let name = stream_event_name(&claude_event);
                            let data = serde_json::to_vec(&claude_event).unwrap_or_default();
                            session
                                .publish(Frame {
                                    event: Some(name.to_string()),
                                    data: Bytes::from(data),
                                })
                                .await;
                            published_any = true;
                            if is_stop {
                                return Ok(StreamResult::Completed);
                            }
                        }
                    }
                    break;
                }
            };

            for event in parser.push_bytes(&chunk) {
                if is_anthropic {
                    let is_stop = event.event.as_deref() == Some("message_stop");
                    session
                        .publish(Frame {
                            event: event.event.clone(),
                            data: Bytes::from(event.data),
                        })
                        .await;
                    published_any = true;
                    if is_stop {
                        return Ok(StreamResult::Completed);
                    }
                } else {
                    if event.data.trim() == "[DONE]" {
                        continue;
                    }
                    let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            warn!(error = %err, "dropping malformed upstream chunk");
                            continue;
                        }
                    };
                    for claude_event in openai_state.push_chunk(chunk) {
                        let is_stop = matches!(claude_event, StreamEventKnown::MessageStop);
                        let name = stream_event_name(&claude_event);
                        let data = serde_json::to_vec(&claude_event).unwrap_or_default();
                        session
                            .publish(Frame {
                                event: Some(name.to_string()),
                                data: Bytes::from(data),
                            })
                            .await;
                        published_any = true;
                        if is_stop {
                            return Ok(StreamResult::Completed);
                        }
                    }
                }
            }

            if session.subscriber_count().await == 0 {
                return Ok(StreamResult::Completed);
            }
        }

        if published_any {
            Ok(StreamResult::Completed)
        } else {
            Err(LifecycleError::local(
                ErrorKind::NetworkError,
                "upstream closed the stream without sending any frame",
            ))
        }
    }

    /// Token counter (§4.7): tries the upstream native counter on the first
    /// healthy anthropic provider whose count-tokens sub-breaker is closed;
    /// falls back to the local estimate (built by [`crate::token_counter`])
    /// on unavailability or upstream failure.
    pub async fn count_tokens(
        &self,
        config: &GlobalConfig,
        request: &CountTokensRequest,
        original_headers: &HeaderMap,
        local_estimate: impl FnOnce() -> u32,
    ) -> CountTokensOutcome {
        if let Some(provider) = self.pool.select_healthy_anthropic().await {
            if self.pool.count_tokens_available(provider.id).await {
                match self
                    .try_upstream_count_tokens(provider, request, original_headers, config)
                    .await
                {
                    Ok(response) => {
                        self.pool.mark_count_tokens_success(provider.id).await;
                        return CountTokensOutcome::Upstream(response);
                    }
                    Err(err) => {
                        self.pool.mark_count_tokens_failed(provider.id).await;
                        warn!(
                            provider = provider.name,
                            error = err.kind.as_str(),
                            "native count_tokens failed, falling back to local estimate"
                        );
                    }
                }
            }
        }

        CountTokensOutcome::Estimated(CountTokensResponse {
            input_tokens: local_estimate(),
        })
    }

    async fn try_upstream_count_tokens(
        &self,
        provider: &Provider,
        request: &CountTokensRequest,
        original_headers: &HeaderMap,
        config: &GlobalConfig,
    ) -> Result<CountTokensResponse, LifecycleError> {
        let headers = AuthResolver::new(self.oauth.as_ref())
            .resolve(provider, original_headers)
            .await
            .map_err(|_| {
                LifecycleError::local(ErrorKind::OAuthUnavailable, "no oauth token available")
            })?;

        let body = serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|err| LifecycleError::local(ErrorKind::ClientRequestError, err.to_string()))?;

        let url = format!("{}/v1/messages/count_tokens?beta=true", provider.base_url);
        let timeouts = match config.count_tokens_timeout_override {
            Some(read) => AttemptTimeouts {
                read,
                total: read.max(AttemptTimeouts::default().total),
                ..AttemptTimeouts::default()
            },
            None => AttemptTimeouts::default(),
        };
        let upstream_req = UpstreamRequest {
            method: http::Method::POST,
            url,
            headers,
            body,
            stream: false,
            proxy: provider.proxy.clone(),
            timeouts,
        };

        let response = self
            .upstream
            .send(upstream_req)
            .await
            .map_err(transport_error_to_lifecycle)?;

        let body_bytes = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut rx) => drain_stream_body(&mut rx).await,
        };

        if !response.status.is_success() {
            return Err(LifecycleError::upstream(
                ErrorKind::from_status(response.status),
                format!("count_tokens upstream returned {}", response.status),
                Some(truncate_body(&body_bytes)),
            ));
        }

        serde_json::from_slice(&body_bytes)
            .map_err(|err| LifecycleError::local(ErrorKind::UpstreamServerError, err.to_string()))
    }
}

enum StreamResult {
    Completed,
    AbortedMidFlight(String),
}

fn stream_event_name(event: &StreamEventKnown) -> &'static str {
    match event {
        StreamEventKnown::MessageStart { .. } => "message_start",
        StreamEventKnown::ContentBlockStart { .. } => "content_block_start",
        StreamEventKnown::ContentBlockDelta { .. } => "content_block_delta",
        StreamEventKnown::ContentBlockStop { .. } => "content_block_stop",
        StreamEventKnown::MessageDelta { .. } => "message_delta",
        StreamEventKnown::MessageStop => "message_stop",
        StreamEventKnown::Ping => "ping",
        StreamEventKnown::Error { .. } => "error",
    }
}

/// Builds the `serde_json::Value` that gets fingerprinted for dedup (§3,
/// §4.5): only the fields that determine the upstream response — `model`,
/// `messages`, `system`, `tools`, `max_tokens`, `temperature`, `stream` —
/// so that two requests differing only in `top_p`, `stop_sequences`,
/// `tool_choice`, or an `extra` passthrough field still dedup together.
fn fingerprint_key_value(request: &MessagesRequest) -> Result<serde_json::Value, serde_json::Error> {
    Ok(serde_json::json!({
        "model": request.model,
        "messages": serde_json::to_value(&request.messages)?,
        "system": serde_json::to_value(&request.system)?,
        "tools": serde_json::to_value(&request.tools)?,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "stream": request.stream,
    }))
}

/// Builds the outgoing URL and wire body for `provider`, converting from
/// the Anthropic Messages shape the client sent us if the candidate speaks
/// OpenAI instead.
fn build_wire_request(
    provider: &Provider,
    request: &MessagesRequest,
) -> Result<(String, Bytes), LifecycleError> {
    match provider.kind {
        ProviderType::Anthropic => {
            let url = format!("{}/v1/messages", provider.base_url);
            let body = serde_json::to_vec(request)
                .map(Bytes::from)
                .map_err(|err| LifecycleError::local(ErrorKind::ClientRequestError, err.to_string()))?;
            Ok((url, body))
        }
        ProviderType::Openai => {
            let url = format!("{}/v1/chat/completions", provider.base_url);
            let openai_request = claude_to_openai::request::transform_request(request.clone());
            let body = serde_json::to_vec(&openai_request)
                .map(Bytes::from)
                .map_err(|err| LifecycleError::local(ErrorKind::ClientRequestError, err.to_string()))?;
            Ok((url, body))
        }
    }
}

fn decode_non_streaming_response(
    provider: &Provider,
    body: &Bytes,
) -> Result<MessagesResponse, LifecycleError> {
    match provider.kind {
        ProviderType::Anthropic => serde_json::from_slice(body).map_err(|err| {
            LifecycleError::local(ErrorKind::UpstreamServerError, format!("malformed upstream body: {err}"))
        }),
        ProviderType::Openai => {
            let openai_response: ChatCompletionResponse =
                serde_json::from_slice(body).map_err(|err| {
                    LifecycleError::local(
                        ErrorKind::UpstreamServerError,
                        format!("malformed upstream body: {err}"),
                    )
                })?;
            Ok(openai_to_claude::response::transform_response(
                openai_response,
            ))
        }
    }
}

async fn drain_stream_body(
    rx: &mut tokio::sync::mpsc::Receiver<Result<Bytes, UpstreamTransportError>>,
) -> Bytes {
    let mut out = BytesMut::new();
    while let Some(chunk) = rx.recv().await {
        if let Ok(chunk) = chunk {
            if out.len() < TRUNCATED_BODY_LIMIT {
                out.extend_from_slice(&chunk);
            }
        }
    }
    out.freeze()
}

fn truncate_body(body: &Bytes) -> String {
    let slice = &body[..body.len().min(TRUNCATED_BODY_LIMIT)];
    String::from_utf8_lossy(slice).into_owned()
}

fn transport_error_to_lifecycle(err: UpstreamTransportError) -> LifecycleError {
    let kind = match err {
        UpstreamTransportError::Timeout => ErrorKind::Timeout,
        UpstreamTransportError::Connect(_)
        | UpstreamTransportError::Dns(_)
        | UpstreamTransportError::Tls(_)
        | UpstreamTransportError::Network(_) => ErrorKind::NetworkError,
    };
    LifecycleError::local(kind, err.to_string())
}
