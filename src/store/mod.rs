//! Storage abstraction: the `StreamStore` trait and the append/fencing logic
//! shared between the in-memory and file-backed implementations.

mod json_array;
pub mod memory;

#[cfg(feature = "file-storage")]
pub mod file;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::offset::Offset;
use crate::types::{
    normalize_content_type, AppendOptions, AppendResult, ProducerState, ReadResult, Stream,
    StreamConfig, StreamMessage, WaitResult,
};

/// Errors surfaced by a `StreamStore`. `crate::error::ApiError` maps each of
/// these onto the HTTP status the protocol layer returns.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stream not found: {0}")]
    NotFound(String),
    #[error("stream already exists with a different configuration")]
    ConfigMismatch,
    #[error("content-type mismatch: expected {expected}, got {actual}")]
    ContentTypeMismatch { expected: String, actual: String },
    #[error("sequence conflict: {0}")]
    SequenceConflict(String),
    #[error("producer epoch {current_epoch} is current; rejected stale epoch")]
    StaleEpoch { current_epoch: u64 },
    #[error("producer sequence gap: expected {expected}, got {received}")]
    SequenceGap { expected: u64, received: u64 },
    #[error("body is not valid JSON")]
    InvalidJson,
    #[error("empty JSON arrays are not allowed")]
    EmptyJsonArray,
    #[error("offset is out of range")]
    InvalidOffset,
    #[error("offset has been reclaimed (segment no longer retained)")]
    OffsetGone,
    #[error("cannot specify both Stream-TTL and Stream-Expires-At")]
    TtlConflict,
    #[error("invalid Stream-TTL value")]
    InvalidTtl,
    #[error("invalid Stream-Expires-At value")]
    InvalidExpiresAt,
    #[error("stream is closed")]
    StreamClosed,
    #[error("stream is already closed")]
    AlreadyClosed,
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Broadcast on every successful append/close/delete so long-poll and SSE
/// waiters can wake without polling. One sender lives per stream.
#[derive(Debug, Clone)]
pub struct StreamNotification {
    pub path: String,
    pub tail_offset: Offset,
    pub closed: bool,
}

/// Persistent, resumable append-only byte stream storage.
///
/// Both implementations (`memory::MemoryStore`, `file::FileStore`) share the
/// validation and fencing logic in this module via `prepare_append` — only
/// the actual persistence of prepared messages differs.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Create a stream, or return the existing one if `path` already exists
    /// with an identical configuration. Returns `(stream, was_created)`.
    async fn create(&self, path: &str, config: StreamConfig) -> Result<(Stream, bool), StoreError>;

    async fn get(&self, path: &str) -> Result<Stream, StoreError>;

    async fn append(
        &self,
        path: &str,
        body: Vec<u8>,
        opts: AppendOptions,
    ) -> Result<AppendResult, StoreError>;

    async fn read(&self, path: &str, from_offset: Offset) -> Result<ReadResult, StoreError>;

    /// Block until new messages are available past `from_offset`, the
    /// deadline elapses, or the stream closes. Cancellation on client
    /// disconnect happens implicitly: axum drops the handler future, which
    /// drops this call along with it.
    async fn wait_for_messages(
        &self,
        path: &str,
        from_offset: Offset,
        deadline: Duration,
    ) -> Result<WaitResult, StoreError>;

    async fn close(&self, path: &str, final_body: Option<Vec<u8>>) -> Result<Offset, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Subscribe to append/close notifications for `path`. `None` if the
    /// stream doesn't exist.
    fn subscribe(&self, path: &str) -> Option<broadcast::Receiver<StreamNotification>>;
}

/// Render a batch of messages as an HTTP response body. JSON streams
/// concatenate each message's raw bytes into a single top-level array
/// (`[m0,m1,...]`); all other streams concatenate the raw bytes directly,
/// preserving exact byte-for-byte content.
pub fn format_response(is_json: bool, messages: &[StreamMessage]) -> Vec<u8> {
    if !is_json {
        let mut out = Vec::new();
        for m in messages {
            out.extend_from_slice(&m.data);
        }
        return out;
    }

    let mut out = Vec::with_capacity(messages.iter().map(|m| m.data.len() + 1).sum::<usize>() + 2);
    out.push(b'[');
    for (i, m) in messages.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&m.data);
    }
    out.push(b']');
    out
}

/// A message prepared for persistence: validated, fenced, and (for JSON
/// array bodies) split into its constituent elements, but not yet given an
/// offset — the backend assigns offsets as it writes, since only it knows
/// the true current tail (and, for the file-backed store, segment
/// boundaries).
pub struct PreparedMessage {
    pub data: Vec<u8>,
}

pub enum PrepareOutcome {
    /// Append goes ahead with these messages.
    Messages(Vec<PreparedMessage>),
    /// A retried idempotent append: no new bytes, return the existing tail.
    Duplicate,
}

/// Validate and fence an append against a stream's current state, without
/// touching storage. Shared by every `StreamStore` implementation.
pub fn prepare_append(
    stream: &mut Stream,
    body: Vec<u8>,
    opts: &AppendOptions,
) -> Result<PrepareOutcome, StoreError> {
    if stream.closed {
        return Err(StoreError::StreamClosed);
    }

    if let Some(ct) = &opts.content_type {
        if let Some(expected) = &stream.content_type {
            if normalize_content_type(ct) != normalize_content_type(expected) {
                return Err(StoreError::ContentTypeMismatch {
                    expected: expected.clone(),
                    actual: ct.clone(),
                });
            }
        }
    }

    if let Some(producer_id) = &opts.producer_id {
        let epoch = opts.epoch.unwrap_or(0);
        let seq = opts.producer_seq.unwrap_or(0);
        if fence_producer(stream, producer_id, epoch, seq)? {
            return Ok(PrepareOutcome::Duplicate);
        }
    } else if let Some(seq) = &opts.seq {
        // Legacy opaque ordering tag: strictly greater than the last one
        // seen, compared as a string (the tag has no defined numeric form).
        if let Some(last) = &stream.last_seq {
            if seq.as_str() <= last.as_str() {
                return Err(StoreError::SequenceConflict(format!(
                    "seq {seq} is not greater than last seq {last}"
                )));
            }
        }
        stream.last_seq = Some(seq.clone());
    }

    let messages = if stream.is_json() {
        split_json_messages(&body)?
    } else {
        vec![PreparedMessage { data: body }]
    };

    Ok(PrepareOutcome::Messages(messages))
}

/// Apply the producer-epoch-table state machine (see module docs on
/// `ProducerState`). Returns `Ok(true)` if this is a duplicate retry that
/// should be accepted as a no-op, `Ok(false)` if the append should proceed.
fn fence_producer(
    stream: &mut Stream,
    producer_id: &str,
    epoch: u64,
    seq: u64,
) -> Result<bool, StoreError> {
    let state = stream
        .producer_epoch_table
        .entry(producer_id.to_string())
        .or_insert_with(|| ProducerState {
            current_epoch: epoch,
            last_acked_seq: None,
        });

    let first_sight = state.last_acked_seq.is_none() && state.current_epoch == epoch;

    if epoch < state.current_epoch {
        return Err(StoreError::StaleEpoch {
            current_epoch: state.current_epoch,
        });
    }
    if epoch > state.current_epoch {
        state.current_epoch = epoch;
        state.last_acked_seq = None;
    }

    match state.last_acked_seq {
        None => {
            if seq != 0 {
                return Err(StoreError::SequenceGap {
                    expected: 0,
                    received: seq,
                });
            }
            state.last_acked_seq = Some(0);
            let _ = first_sight;
            Ok(false)
        }
        Some(last) if seq == last => Ok(true),
        Some(last) if seq == last + 1 => {
            state.last_acked_seq = Some(seq);
            Ok(false)
        }
        Some(last) => Err(StoreError::SequenceGap {
            expected: last + 1,
            received: seq,
        }),
    }
}

fn split_json_messages(body: &[u8]) -> Result<Vec<PreparedMessage>, StoreError> {
    let trimmed = trim_ascii_whitespace(body);
    if trimmed.is_empty() {
        return Err(StoreError::InvalidJson);
    }

    if trimmed[0] == b'[' {
        let elements = json_array::split_top_level_elements(trimmed).ok_or(StoreError::InvalidJson)?;
        if elements.is_empty() {
            return Err(StoreError::EmptyJsonArray);
        }
        return Ok(elements
            .into_iter()
            .map(|data| PreparedMessage { data: data.to_vec() })
            .collect());
    }

    // Non-array JSON: validate syntax, store the single value's raw bytes
    // unmodified.
    serde_json::from_slice::<serde_json::de::IgnoredAny>(trimmed).map_err(|_| StoreError::InvalidJson)?;
    Ok(vec![PreparedMessage {
        data: trimmed.to_vec(),
    }])
}

fn trim_ascii_whitespace(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(b.len());
    let end = b.iter().rposition(|c| !c.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
    &b[start..end.max(start)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer_opts(producer_id: &str, epoch: u64, seq: u64) -> AppendOptions {
        AppendOptions {
            producer_id: Some(producer_id.to_string()),
            epoch: Some(epoch),
            producer_seq: Some(seq),
            ..Default::default()
        }
    }

    #[test]
    fn first_sight_requires_seq_zero() {
        let mut stream = Stream::new("/x".to_string());
        let err = fence_producer(&mut stream, "p1", 0, 1).unwrap_err();
        assert!(matches!(err, StoreError::SequenceGap { expected: 0, received: 1 }));
    }

    #[test]
    fn accepts_sequential_seqs() {
        let mut stream = Stream::new("/x".to_string());
        assert!(!fence_producer(&mut stream, "p1", 0, 0).unwrap());
        assert!(!fence_producer(&mut stream, "p1", 0, 1).unwrap());
        assert!(!fence_producer(&mut stream, "p1", 0, 2).unwrap());
    }

    #[test]
    fn duplicate_seq_is_a_noop() {
        let mut stream = Stream::new("/x".to_string());
        fence_producer(&mut stream, "p1", 0, 0).unwrap();
        assert!(fence_producer(&mut stream, "p1", 0, 0).unwrap());
    }

    #[test]
    fn gap_is_rejected() {
        let mut stream = Stream::new("/x".to_string());
        fence_producer(&mut stream, "p1", 0, 0).unwrap();
        let err = fence_producer(&mut stream, "p1", 0, 5).unwrap_err();
        assert!(matches!(err, StoreError::SequenceGap { expected: 1, received: 5 }));
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let mut stream = Stream::new("/x".to_string());
        fence_producer(&mut stream, "p1", 1, 0).unwrap();
        let err = fence_producer(&mut stream, "p1", 0, 1).unwrap_err();
        assert!(matches!(err, StoreError::StaleEpoch { current_epoch: 1 }));
    }

    #[test]
    fn higher_epoch_resets_sequence() {
        let mut stream = Stream::new("/x".to_string());
        fence_producer(&mut stream, "p1", 0, 0).unwrap();
        fence_producer(&mut stream, "p1", 0, 1).unwrap();
        // New epoch: sequence restarts at 0 regardless of the old epoch's progress.
        assert!(!fence_producer(&mut stream, "p1", 1, 0).unwrap());
    }

    #[test]
    fn prepare_append_rejects_closed_stream() {
        let mut stream = Stream::new("/x".to_string());
        stream.closed = true;
        let err = prepare_append(&mut stream, b"hi".to_vec(), &AppendOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::StreamClosed));
    }

    #[test]
    fn prepare_append_flattens_json_array_preserving_bytes() {
        let mut stream = Stream::new("/x".to_string());
        stream.content_type = Some("application/json".to_string());
        let body = br#"[{"a": 1},  {"b":2}]"#.to_vec();
        let outcome = prepare_append(&mut stream, body, &AppendOptions::default()).unwrap();
        match outcome {
            PrepareOutcome::Messages(msgs) => {
                assert_eq!(msgs.len(), 2);
                assert_eq!(msgs[0].data, br#"{"a": 1}"#);
                assert_eq!(msgs[1].data, br#"{"b":2}"#);
            }
            PrepareOutcome::Duplicate => panic!("expected messages"),
        }
    }

    #[test]
    fn prepare_append_rejects_empty_json_array() {
        let mut stream = Stream::new("/x".to_string());
        stream.content_type = Some("application/json".to_string());
        let err = prepare_append(&mut stream, b"[]".to_vec(), &AppendOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::EmptyJsonArray));
    }

    #[test]
    fn prepare_append_stores_non_array_json_whole() {
        let mut stream = Stream::new("/x".to_string());
        stream.content_type = Some("application/json".to_string());
        let outcome = prepare_append(&mut stream, br#"{"a":1}"#.to_vec(), &AppendOptions::default()).unwrap();
        match outcome {
            PrepareOutcome::Messages(msgs) => {
                assert_eq!(msgs.len(), 1);
                assert_eq!(msgs[0].data, br#"{"a":1}"#);
            }
            PrepareOutcome::Duplicate => panic!("expected messages"),
        }
    }

    #[test]
    fn prepare_append_duplicate_producer_retry_yields_no_messages() {
        let mut stream = Stream::new("/x".to_string());
        prepare_append(&mut stream, b"a".to_vec(), &producer_opts("p1", 0, 0)).unwrap();
        let outcome = prepare_append(&mut stream, b"a".to_vec(), &producer_opts("p1", 0, 0)).unwrap();
        assert!(matches!(outcome, PrepareOutcome::Duplicate));
    }

    #[test]
    fn format_response_joins_json_as_array() {
        let msgs = vec![
            StreamMessage { data: b"1".to_vec(), content_type: None, offset: Offset::zero(), timestamp: 0 },
            StreamMessage { data: b"2".to_vec(), content_type: None, offset: Offset::zero(), timestamp: 0 },
        ];
        assert_eq!(format_response(true, &msgs), b"[1,2]");
    }

    #[test]
    fn format_response_concatenates_raw_bytes() {
        let msgs = vec![
            StreamMessage { data: b"ab".to_vec(), content_type: None, offset: Offset::zero(), timestamp: 0 },
            StreamMessage { data: b"cd".to_vec(), content_type: None, offset: Offset::zero(), timestamp: 0 },
        ];
        assert_eq!(format_response(false, &msgs), b"abcd");
    }
}
