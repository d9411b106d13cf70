//! Request header and query-parameter parsing for the stream protocol.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ApiError;

/// `GET` query parameters.
#[derive(Debug, Deserialize, Default)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMode {
    None,
    LongPoll,
    Sse,
}

impl ReadQuery {
    pub fn live_mode(&self) -> Result<LiveMode, ApiError> {
        match self.live.as_deref() {
            None => Ok(LiveMode::None),
            Some("auto") | Some("long-poll") => Ok(LiveMode::LongPoll),
            Some("sse") => Ok(LiveMode::Sse),
            Some(other) => Err(ApiError::BadRequest(format!("unknown live mode: {other}"))),
        }
    }
}

/// Parse and validate the `Stream-TTL` header: `^([1-9][0-9]*|0)$`.
pub fn parse_ttl(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    let Some(raw) = headers.get("stream-ttl") else { return Ok(None) };
    let raw = raw.to_str().map_err(|_| ApiError::BadRequest("invalid Stream-TTL".into()))?;
    if raw.is_empty() || (raw.len() > 1 && raw.starts_with('0')) || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest("invalid Stream-TTL".into()));
    }
    raw.parse::<u64>().map(Some).map_err(|_| ApiError::BadRequest("invalid Stream-TTL".into()))
}

pub fn parse_expires_at(headers: &HeaderMap) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = headers.get("stream-expires-at") else { return Ok(None) };
    let raw = raw.to_str().map_err(|_| ApiError::BadRequest("invalid Stream-Expires-At".into()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|_| ApiError::BadRequest("invalid Stream-Expires-At".into()))
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(String::from)
}

pub fn stream_seq(headers: &HeaderMap) -> Option<String> {
    headers.get("stream-seq").and_then(|v| v.to_str().ok()).map(String::from)
}

pub fn stream_closed(headers: &HeaderMap) -> bool {
    headers.get("stream-closed").and_then(|v| v.to_str().ok()) == Some("true")
}

pub fn if_none_match(headers: &HeaderMap) -> Option<String> {
    headers.get(axum::http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()).map(String::from)
}

/// The idempotent-producer triple, if all three headers are present.
/// A partial triple (some but not all headers set) is a 400.
pub fn producer_triple(headers: &HeaderMap) -> Result<Option<(String, u64, u64)>, ApiError> {
    let id = headers.get("producer-id").and_then(|v| v.to_str().ok());
    let epoch = headers.get("producer-epoch").and_then(|v| v.to_str().ok());
    let seq = headers.get("producer-seq").and_then(|v| v.to_str().ok());

    match (id, epoch, seq) {
        (None, None, None) => Ok(None),
        (Some(id), Some(epoch), Some(seq)) => {
            let epoch = epoch.parse::<u64>().map_err(|_| ApiError::BadRequest("invalid Producer-Epoch".into()))?;
            let seq = seq.parse::<u64>().map_err(|_| ApiError::BadRequest("invalid Producer-Seq".into()))?;
            Ok(Some((id.to_string(), epoch, seq)))
        }
        _ => Err(ApiError::BadRequest(
            "Producer-Id, Producer-Epoch, Producer-Seq must be supplied together".into(),
        )),
    }
}
