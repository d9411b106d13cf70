//! Core data types for the durable streams server.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor;
use crate::offset::Offset;

/// A message stored in a stream. Immutable once appended.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Raw payload bytes.
    pub data: Vec<u8>,
    /// Content type recorded for this message (equal to the stream's
    /// content type for the lifetime of the stream).
    pub content_type: Option<String>,
    /// Offset *after* this message — the next-read offset for a consumer
    /// that has just consumed it.
    pub offset: Offset,
    /// Milliseconds since the Unix epoch when the message was appended.
    pub timestamp: i64,
}

/// Per-producer idempotency state (spec.md §3, producer_epoch_table entry).
#[derive(Debug, Clone, Default)]
pub struct ProducerState {
    pub current_epoch: u64,
    /// -1 is represented as `None`; any other value is `Some(seq)`.
    pub last_acked_seq: Option<u64>,
}

/// Stream metadata. `messages` lives alongside it in the in-memory store;
/// the file-backed store keeps only this struct in its KV index and the
/// messages in segment files.
#[derive(Debug, Clone)]
pub struct Stream {
    pub path: String,
    pub content_type: Option<String>,
    pub current_offset: Offset,
    /// Opaque ordering tag from the last successful `Stream-Seq` append.
    pub last_seq: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub closed: bool,
    pub created_at: i64,
    pub producer_epoch_table: HashMap<String, ProducerState>,
}

impl Stream {
    pub fn new(path: String) -> Self {
        Self {
            path,
            content_type: None,
            current_offset: Offset::zero(),
            last_seq: None,
            ttl_seconds: None,
            expires_at: None,
            closed: false,
            created_at: Utc::now().timestamp_millis(),
            producer_epoch_table: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            return Utc::now() >= expires_at;
        }
        if let Some(ttl_seconds) = self.ttl_seconds {
            let expiry = self.created_at + (ttl_seconds as i64 * 1000);
            return Utc::now().timestamp_millis() >= expiry;
        }
        false
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| {
                let ct = normalize_content_type(ct);
                ct == "application/json" || ct.ends_with("+json")
            })
            .unwrap_or(false)
    }
}

/// Lifecycle event for subscribers of store-internal hooks (used to wire the
/// webhook manager to appends/creates/deletes without coupling the store to
/// it directly).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamLifecycleEvent {
    Created {
        path: String,
        content_type: Option<String>,
        timestamp: i64,
    },
    Appended {
        path: String,
        offset: String,
        timestamp: i64,
    },
    Deleted {
        path: String,
        timestamp: i64,
    },
}

/// Configuration supplied on stream creation (spec.md §4.2 Create op).
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub content_type: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub initial_body: Option<Vec<u8>>,
    pub closed: bool,
}

/// Options accompanying an append (spec.md §4.2 Append op).
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    pub content_type: Option<String>,
    /// Opaque `Stream-Seq` ordering tag, independent of producer fencing.
    pub seq: Option<String>,
    pub producer_id: Option<String>,
    pub epoch: Option<u64>,
    pub producer_seq: Option<u64>,
    /// `Stream-Closed: true` — commit this append, then close the stream.
    pub close_after: bool,
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct AppendResult {
    pub new_offset: Offset,
    pub was_duplicate: bool,
}

/// Result of a Read operation.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub messages: Vec<StreamMessage>,
    pub tail_offset: Offset,
    pub up_to_date: bool,
}

/// Result of a WaitForMessages operation.
#[derive(Debug, Clone)]
pub struct WaitResult {
    pub messages: Vec<StreamMessage>,
    pub tail_offset: Offset,
    pub timed_out: bool,
}

/// Server-wide configuration. Constructed programmatically or via CLI flags
/// (see `src/bin/server.rs`) — text-file configuration loading is an
/// out-of-scope external collaborator.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub port: u16,
    pub host: String,
    /// Default long-poll deadline.
    pub long_poll_timeout_ms: u64,
    /// SSE forced-reconnect cadence.
    pub sse_reconnect_interval_ms: u64,
    /// Data directory for file-backed storage; `None` selects the in-memory
    /// store.
    pub data_dir: Option<String>,
    /// Bounded LRU cap on open segment-file handles (file-backed store).
    pub max_file_handles: usize,
    pub compression: bool,
    pub cursor_interval_seconds: u64,
    pub cursor_epoch: DateTime<Utc>,
    /// Base URL the webhook manager advertises as the claim endpoint; `None`
    /// disables the webhook subsystem entirely.
    pub webhook_callback_url: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 4437,
            host: "127.0.0.1".to_string(),
            long_poll_timeout_ms: 30_000,
            sse_reconnect_interval_ms: 60_000,
            data_dir: None,
            max_file_handles: 100,
            compression: true,
            cursor_interval_seconds: 20,
            cursor_epoch: cursor::default_epoch(),
            webhook_callback_url: None,
        }
    }
}

impl ServerOptions {
    pub fn cursor_options(&self) -> cursor::CursorOptions {
        cursor::CursorOptions {
            interval_seconds: self.cursor_interval_seconds,
            epoch: self.cursor_epoch,
        }
    }
}

/// Normalize a content type by stripping charset and other parameters.
pub fn normalize_content_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_parameters() {
        assert_eq!(
            normalize_content_type("application/json; charset=utf-8"),
            "application/json"
        );
        assert_eq!(normalize_content_type("text/plain"), "text/plain");
    }

    #[test]
    fn is_json_recognizes_structured_suffix() {
        let mut s = Stream::new("/x".to_string());
        s.content_type = Some("application/vnd.api+json".to_string());
        assert!(s.is_json());
    }

    #[test]
    fn expiry_checks_ttl_and_absolute() {
        let mut s = Stream::new("/x".to_string());
        assert!(!s.is_expired());
        s.ttl_seconds = Some(0);
        s.created_at -= 1000;
        assert!(s.is_expired());
    }
}
