//! HTTP protocol handler: method dispatch, header/query parsing, response
//! framing (ETag/Cache-Control policy, live-mode dispatch).

pub mod headers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{delete, get, head, post, put};
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::offset::Offset;
use crate::store::{format_response, StoreError, StreamStore};
use crate::types::{AppendOptions, ServerOptions, StreamConfig};
use crate::webhook::WebhookManager;

use headers::{LiveMode, ReadQuery};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StreamStore>,
    pub options: ServerOptions,
    pub webhooks: Option<Arc<WebhookManager>>,
}

const EXPOSED_HEADERS: &str =
    "Stream-Next-Offset, Stream-Cursor, Stream-Up-To-Date, ETag, Location";
const ALLOWED_HEADERS: &str = "Content-Type, Stream-Seq, Stream-TTL, Stream-Expires-At, If-None-Match";

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(ALLOWED_HEADERS.split(", ").map(|h| h.parse().unwrap()).collect::<Vec<_>>())
        .expose_headers(EXPOSED_HEADERS.split(", ").map(|h| h.parse().unwrap()).collect::<Vec<_>>());

    let compression = CompressionLayer::new().gzip(true).deflate(true);

    let mut router = Router::new()
        .route("/{*path}", put(handle_create))
        .route("/{*path}", head(handle_head))
        .route("/{*path}", get(handle_read))
        .route("/{*path}", post(handle_append))
        .route("/{*path}", delete(handle_delete))
        .layer(cors);

    if state.options.compression {
        router = router.layer(compression);
    }

    crate::webhook::mount(router, state.clone()).with_state(state)
}

fn request_path(path: String) -> String {
    format!("/{path}")
}

fn etag_for(path: &str, start: &Offset, end: &Offset) -> String {
    let path_b64 = URL_SAFE_NO_PAD.encode(path);
    format!("\"{path_b64}:{start}:{end}\"")
}

async fn handle_create(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request_headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let path = request_path(path);
    debug!(%path, "create");

    let content_type = headers::content_type(&request_headers);
    let ttl_seconds = headers::parse_ttl(&request_headers)?;
    let expires_at = headers::parse_expires_at(&request_headers)?;
    let closed = headers::stream_closed(&request_headers);

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| ApiError::BadRequest("failed to read request body".into()))?;
    let initial_body = if body_bytes.is_empty() { None } else { Some(body_bytes.to_vec()) };

    let config = StreamConfig {
        content_type: content_type.clone(),
        ttl_seconds,
        expires_at,
        initial_body,
        closed,
    };

    let had_initial_body = config.initial_body.is_some();
    let (stream, was_created) = state.store.create(&path, config).await?;

    if was_created && had_initial_body {
        if let Some(webhooks) = &state.webhooks {
            webhooks.notify_append(&path, stream.current_offset).await;
        }
    }

    let mut response = Response::builder()
        .status(if was_created { StatusCode::CREATED } else { StatusCode::OK })
        .header("Stream-Next-Offset", stream.current_offset.to_string());
    if was_created {
        response = response.header(header::LOCATION, &path);
    }
    if let Some(ct) = &content_type {
        response = response.header(header::CONTENT_TYPE, ct);
    }

    Ok(response.body(Body::empty()).unwrap())
}

async fn handle_head(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let path = request_path(path);
    let stream = state.store.get(&path).await?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Stream-Next-Offset", stream.current_offset.to_string());
    if let Some(ct) = &stream.content_type {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }
    if let Some(ttl) = stream.ttl_seconds {
        response = response.header("Stream-TTL", ttl.to_string());
    }
    if let Some(expires_at) = stream.expires_at {
        response = response.header("Stream-Expires-At", expires_at.to_rfc3339());
    }

    Ok(response.body(Body::empty()).unwrap())
}

async fn handle_read(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(raw_query): RawQuery,
    Query(query): Query<ReadQuery>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = request_path(path);

    if let Some(raw) = &raw_query {
        let offset_params = raw.split('&').filter(|kv| *kv == "offset" || kv.starts_with("offset=")).count();
        if offset_params > 1 {
            return Err(ApiError::BadRequest("multiple offset parameters".into()));
        }
    }
    if query.offset.as_deref() == Some("") {
        return Err(ApiError::BadRequest("empty offset parameter".into()));
    }

    let live_mode = query.live_mode()?;
    if matches!(live_mode, LiveMode::LongPoll | LiveMode::Sse) && query.offset.is_none() {
        return Err(ApiError::BadRequest("live reads require an explicit offset".into()));
    }

    let stream = state.store.get(&path).await?;
    let offset = match &query.offset {
        Some(raw) => Offset::parse(raw).map_err(|_| ApiError::BadRequest("invalid offset".into()))?,
        None => Offset::Beginning,
    };
    let client_cursor = query.cursor.as_deref().and_then(crate::cursor::parse_cursor);
    let cursor_options = state.options.cursor_options();

    match live_mode {
        LiveMode::None => catch_up(&state, stream, offset, request_headers).await,
        LiveMode::LongPoll => long_poll(&state, stream, offset, client_cursor, &cursor_options).await,
        LiveMode::Sse => sse_response(&state, stream, offset, client_cursor, cursor_options),
    }
}

async fn catch_up(
    state: &AppState,
    stream: crate::types::Stream,
    offset: Offset,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let result = state.store.read(&stream.path, offset).await?;
    let etag = etag_for(&stream.path, &offset, &result.tail_offset);

    if !result.up_to_date {
        if let Some(inm) = headers::if_none_match(&request_headers) {
            if inm == etag {
                return Ok(StatusCode::NOT_MODIFIED.into_response());
            }
        }
    }

    let body = format_response(stream.is_json(), &result.messages);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Stream-Next-Offset", result.tail_offset.to_string())
        .header("Stream-Up-To-Date", result.up_to_date.to_string());

    if let Some(ct) = &stream.content_type {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }
    if !result.up_to_date {
        response = response
            .header(header::ETAG, etag)
            .header(header::CACHE_CONTROL, "public, max-age=60, stale-while-revalidate=300");
    }

    Ok(response.body(Body::from(body)).unwrap())
}

async fn long_poll(
    state: &AppState,
    stream: crate::types::Stream,
    offset: Offset,
    client_cursor: Option<u64>,
    cursor_options: &crate::cursor::CursorOptions,
) -> Result<Response, ApiError> {
    let timeout = Duration::from_millis(state.options.long_poll_timeout_ms);
    let result = crate::live::long_poll::handle(&state.store, stream, offset, timeout, client_cursor, cursor_options)
        .await?;

    let status = if result.timed_out { StatusCode::NO_CONTENT } else { StatusCode::OK };
    let body = format_response(result.stream.is_json(), &result.messages);

    let mut response = Response::builder()
        .status(status)
        .header("Stream-Next-Offset", result.next_offset.to_string())
        .header("Stream-Cursor", result.cursor.to_string())
        .header("Stream-Up-To-Date", result.up_to_date.to_string());
    if !result.timed_out {
        if let Some(ct) = &result.stream.content_type {
            response = response.header(header::CONTENT_TYPE, ct.as_str());
        }
    }

    Ok(response.body(Body::from(body)).unwrap())
}

fn sse_response(
    state: &AppState,
    stream: crate::types::Stream,
    offset: Offset,
    client_cursor: Option<u64>,
    cursor_options: crate::cursor::CursorOptions,
) -> Result<Response, ApiError> {
    let is_text_or_json = stream
        .content_type
        .as_deref()
        .map(|ct| {
            let ct = crate::types::normalize_content_type(ct);
            ct.starts_with("text/") || ct == "application/json" || ct.ends_with("+json")
        })
        .unwrap_or(false);
    if !is_text_or_json {
        return Err(ApiError::BadRequest(
            "SSE requires a text/* or application/json stream".into(),
        ));
    }

    let cursor = crate::cursor::generate_response_cursor(client_cursor, &cursor_options);
    let reconnect = Duration::from_millis(state.options.sse_reconnect_interval_ms);
    let event_stream = crate::live::sse::stream(
        state.store.clone(),
        stream.path.clone(),
        offset,
        stream.is_json(),
        cursor,
        cursor_options,
        reconnect,
    );

    Ok(Sse::new(event_stream)
        .keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

async fn handle_append(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request_headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let path = request_path(path);

    let content_type = headers::content_type(&request_headers)
        .ok_or_else(|| ApiError::BadRequest("Content-Type is required".into()))?;
    let seq = headers::stream_seq(&request_headers);
    let producer = headers::producer_triple(&request_headers)?;
    let close_after = headers::stream_closed(&request_headers);

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| ApiError::BadRequest("failed to read request body".into()))?;

    let opts = AppendOptions {
        content_type: Some(content_type),
        seq,
        producer_id: producer.as_ref().map(|p| p.0.clone()),
        epoch: producer.as_ref().map(|p| p.1),
        producer_seq: producer.as_ref().map(|p| p.2),
        close_after,
    };

    match state.store.append(&path, body_bytes.to_vec(), opts).await {
        Ok(result) => {
            if !result.was_duplicate {
                if let Some(webhooks) = &state.webhooks {
                    webhooks.notify_append(&path, result.new_offset).await;
                }
            }
            let status = if result.was_duplicate { StatusCode::NO_CONTENT } else { StatusCode::OK };
            Ok(Response::builder()
                .status(status)
                .header("Stream-Next-Offset", result.new_offset.to_string())
                .body(Body::empty())
                .unwrap())
        }
        Err(StoreError::StaleEpoch { current_epoch }) => Ok(Response::builder()
            .status(StatusCode::FORBIDDEN)
            .header("Producer-Epoch", current_epoch.to_string())
            .body(Body::from("stale producer epoch"))
            .unwrap()),
        Err(e) => {
            if matches!(e, StoreError::Internal(_)) {
                warn!(error = %e, %path, "append failed");
            }
            Err(e.into())
        }
    }
}

async fn handle_delete(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response, ApiError> {
    let path = request_path(path);
    state.store.delete(&path).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
