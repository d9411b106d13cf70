//! In-memory `StreamStore`: everything lives in a `HashMap` guarded by a
//! `parking_lot::RwLock`. No persistence across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::offset::Offset;
use crate::types::{
    AppendOptions, AppendResult, ReadResult, Stream, StreamConfig, StreamMessage, WaitResult,
};

use super::{prepare_append, PrepareOutcome, PreparedMessage, StoreError, StreamNotification, StreamStore};

const NOTIFY_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct Entry {
    stream: Stream,
    messages: Vec<StreamMessage>,
    notify: broadcast::Sender<StreamNotification>,
}

/// In-memory stream storage, suitable for tests and non-durable deployments.
pub struct MemoryStore {
    streams: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
        });
        store.clone().spawn_sweep_task();
        store
    }

    /// Periodically removes streams past their TTL/expiry, mirroring the
    /// file-backed store's sweep. Without it, an expired stream nobody reads
    /// or appends to again would sit in the map forever.
    fn spawn_sweep_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        });
    }

    fn sweep_expired(&self) {
        let mut streams = self.streams.write();
        let expired: Vec<String> = streams
            .iter()
            .filter(|(_, entry)| entry.stream.is_expired())
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            if let Some(entry) = streams.remove(&path) {
                let _ = entry.notify.send(StreamNotification {
                    path: entry.stream.path.clone(),
                    tail_offset: entry.stream.current_offset,
                    closed: true,
                });
            }
        }
    }
}

fn append_prepared(entry: &mut Entry, prepared: Vec<PreparedMessage>) -> Offset {
    let content_type = entry.stream.content_type.clone();
    for p in prepared {
        let new_offset = entry.stream.current_offset.advance(p.data.len() as u64);
        entry.messages.push(StreamMessage {
            data: p.data,
            content_type: content_type.clone(),
            offset: new_offset,
            timestamp: Utc::now().timestamp_millis(),
        });
        entry.stream.current_offset = new_offset;
    }
    entry.stream.current_offset
}

fn notify(entry: &Entry) {
    let _ = entry.notify.send(StreamNotification {
        path: entry.stream.path.clone(),
        tail_offset: entry.stream.current_offset,
        closed: entry.stream.closed,
    });
}

/// Messages at or after `from_offset`, resolving the `Beginning`/`Now`
/// sentinels against the stream's current state.
fn messages_from(entry: &Entry, from_offset: Offset) -> Vec<StreamMessage> {
    match from_offset {
        Offset::Beginning => entry.messages.clone(),
        Offset::Now => Vec::new(),
        at @ Offset::At(..) => entry
            .messages
            .iter()
            .filter(|m| crate::offset::compare(&at, &m.offset) == Some(std::cmp::Ordering::Less))
            .cloned()
            .collect(),
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn create(&self, path: &str, config: StreamConfig) -> Result<(Stream, bool), StoreError> {
        if config.ttl_seconds.is_some() && config.expires_at.is_some() {
            return Err(StoreError::TtlConflict);
        }

        let mut streams = self.streams.write();
        if let Some(existing) = streams.get(path) {
            if existing.stream.is_expired() {
                streams.remove(path);
            } else if existing.stream.closed {
                return Err(StoreError::StreamClosed);
            } else {
                let same = existing.stream.content_type == config.content_type
                    && existing.stream.ttl_seconds == config.ttl_seconds
                    && existing.stream.expires_at == config.expires_at;
                if !same {
                    return Err(StoreError::ConfigMismatch);
                }
                return Ok((existing.stream.clone(), false));
            }
        }

        let mut stream = Stream::new(path.to_string());
        stream.content_type = config.content_type;
        stream.ttl_seconds = config.ttl_seconds;
        stream.expires_at = config.expires_at;
        stream.closed = config.closed;

        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let mut entry = Entry {
            stream,
            messages: Vec::new(),
            notify: notify_tx,
        };

        if let Some(body) = config.initial_body {
            let prepared = match prepare_append(&mut entry.stream, body, &AppendOptions::default())? {
                PrepareOutcome::Messages(m) => m,
                PrepareOutcome::Duplicate => Vec::new(),
            };
            append_prepared(&mut entry, prepared);
        }

        let result = entry.stream.clone();
        streams.insert(path.to_string(), entry);
        Ok((result, true))
    }

    async fn get(&self, path: &str) -> Result<Stream, StoreError> {
        let streams = self.streams.read();
        let entry = streams.get(path).ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if entry.stream.is_expired() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(entry.stream.clone())
    }

    async fn append(
        &self,
        path: &str,
        body: Vec<u8>,
        opts: AppendOptions,
    ) -> Result<AppendResult, StoreError> {
        let mut streams = self.streams.write();
        let entry = streams
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if entry.stream.is_expired() {
            streams.remove(path);
            return Err(StoreError::NotFound(path.to_string()));
        }

        let outcome = prepare_append(&mut entry.stream, body, &opts)?;
        let result = match outcome {
            PrepareOutcome::Duplicate => AppendResult {
                new_offset: entry.stream.current_offset,
                was_duplicate: true,
            },
            PrepareOutcome::Messages(prepared) => {
                let new_offset = append_prepared(entry, prepared);
                if opts.close_after {
                    entry.stream.closed = true;
                }
                notify(entry);
                AppendResult {
                    new_offset,
                    was_duplicate: false,
                }
            }
        };
        Ok(result)
    }

    async fn read(&self, path: &str, from_offset: Offset) -> Result<ReadResult, StoreError> {
        let streams = self.streams.read();
        let entry = streams.get(path).ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if entry.stream.is_expired() {
            return Err(StoreError::NotFound(path.to_string()));
        }

        let resolved = if from_offset.is_now() {
            entry.stream.current_offset
        } else {
            from_offset
        };
        let messages = messages_from(entry, resolved);
        Ok(ReadResult {
            messages,
            tail_offset: entry.stream.current_offset,
            up_to_date: resolved == entry.stream.current_offset || from_offset.is_now(),
        })
    }

    async fn wait_for_messages(
        &self,
        path: &str,
        from_offset: Offset,
        deadline: Duration,
    ) -> Result<WaitResult, StoreError> {
        let mut rx = {
            let streams = self.streams.read();
            let entry = streams.get(path).ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            entry.notify.subscribe()
        };

        let first = self.read(path, from_offset).await?;
        if !first.messages.is_empty() {
            return Ok(WaitResult {
                messages: first.messages,
                tail_offset: first.tail_offset,
                timed_out: false,
            });
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(_) => return,
                    Err(broadcast::error::RecvError::Lagged(_)) => return,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        };

        match timeout(deadline, wait).await {
            Ok(()) => {
                let after = self.read(path, from_offset).await?;
                Ok(WaitResult {
                    messages: after.messages,
                    tail_offset: after.tail_offset,
                    timed_out: false,
                })
            }
            Err(_) => {
                let tail = self.get(path).await.map(|s| s.current_offset).unwrap_or(from_offset);
                Ok(WaitResult {
                    messages: Vec::new(),
                    tail_offset: tail,
                    timed_out: true,
                })
            }
        }
    }

    async fn close(&self, path: &str, final_body: Option<Vec<u8>>) -> Result<Offset, StoreError> {
        let mut streams = self.streams.write();
        let entry = streams
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if entry.stream.closed {
            return Err(StoreError::AlreadyClosed);
        }

        if let Some(body) = final_body {
            let prepared = match prepare_append(&mut entry.stream, body, &AppendOptions::default())? {
                PrepareOutcome::Messages(m) => m,
                PrepareOutcome::Duplicate => Vec::new(),
            };
            append_prepared(entry, prepared);
        }
        entry.stream.closed = true;
        notify(entry);
        Ok(entry.stream.current_offset)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut streams = self.streams.write();
        match streams.remove(path) {
            Some(entry) => {
                let _ = entry.notify.send(StreamNotification {
                    path: entry.stream.path.clone(),
                    tail_offset: entry.stream.current_offset,
                    closed: true,
                });
                Ok(())
            }
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    fn subscribe(&self, path: &str) -> Option<broadcast::Receiver<StreamNotification>> {
        let streams = self.streams.read();
        streams.get(path).map(|e| e.notify.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_append_then_read() {
        let store = MemoryStore::new();
        store
            .create(
                "/x",
                StreamConfig {
                    content_type: Some("text/plain".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = store
            .append("/x", b"hello".to_vec(), AppendOptions::default())
            .await
            .unwrap();
        assert!(!result.was_duplicate);

        let read = store.read("/x", Offset::Beginning).await.unwrap();
        assert_eq!(read.messages.len(), 1);
        assert_eq!(read.messages[0].data, b"hello");
        assert!(read.up_to_date);
    }

    #[tokio::test]
    async fn create_is_idempotent_for_matching_config() {
        let store = MemoryStore::new();
        let (_, created_first) = store.create("/x", StreamConfig::default()).await.unwrap();
        let (_, created_second) = store.create("/x", StreamConfig::default()).await.unwrap();
        assert!(created_first);
        assert!(!created_second);
    }

    #[tokio::test]
    async fn create_rejects_mismatched_config() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        let err = store
            .create(
                "/x",
                StreamConfig {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConfigMismatch));
    }

    #[tokio::test]
    async fn json_array_append_flattens_into_separate_messages() {
        let store = MemoryStore::new();
        store
            .create(
                "/x",
                StreamConfig {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .append("/x", br#"[{"a":1},{"a":2},{"a":3}]"#.to_vec(), AppendOptions::default())
            .await
            .unwrap();

        let read = store.read("/x", Offset::Beginning).await.unwrap();
        assert_eq!(read.messages.len(), 3);
        assert_eq!(read.messages[0].data, br#"{"a":1}"#);
        assert_eq!(read.messages[2].data, br#"{"a":3}"#);
        // Offsets strictly increase across the flattened messages.
        assert!(read.messages[0].offset < read.messages[1].offset);
        assert!(read.messages[1].offset < read.messages[2].offset);
    }

    #[tokio::test]
    async fn append_to_missing_stream_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .append("/missing", b"x".to_vec(), AppendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn closed_stream_rejects_append() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        store.close("/x", None).await.unwrap();
        let err = store
            .append("/x", b"y".to_vec(), AppendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StreamClosed));
    }

    #[tokio::test]
    async fn double_close_is_rejected() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        store.close("/x", None).await.unwrap();
        let err = store.close("/x", None).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyClosed));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        store.delete("/x").await.unwrap();
        let err = store.get("/x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn wait_for_messages_wakes_on_append() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        let tail = store.get("/x").await.unwrap().current_offset;

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            waiter_store
                .wait_for_messages("/x", tail, Duration::from_secs(5))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .append("/x", b"woke".to_vec(), AppendOptions::default())
            .await
            .unwrap();

        let result = waiter.await.unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].data, b"woke");
    }

    #[tokio::test]
    async fn wait_for_messages_times_out_with_no_data() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        let tail = store.get("/x").await.unwrap().current_offset;
        let result = store
            .wait_for_messages("/x", tail, Duration::from_millis(30))
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(result.messages.is_empty());
    }

    #[tokio::test]
    async fn idempotent_producer_retry_does_not_duplicate() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();

        let opts = AppendOptions {
            producer_id: Some("p1".to_string()),
            epoch: Some(0),
            producer_seq: Some(0),
            ..Default::default()
        };
        let first = store.append("/x", b"a".to_vec(), opts.clone()).await.unwrap();
        let retry = store.append("/x", b"a".to_vec(), opts).await.unwrap();

        assert!(!first.was_duplicate);
        assert!(retry.was_duplicate);
        let read = store.read("/x", Offset::Beginning).await.unwrap();
        assert_eq!(read.messages.len(), 1);
    }

    #[tokio::test]
    async fn stale_epoch_is_rejected() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        let high = AppendOptions {
            producer_id: Some("p1".to_string()),
            epoch: Some(1),
            producer_seq: Some(0),
            ..Default::default()
        };
        store.append("/x", b"a".to_vec(), high).await.unwrap();

        let stale = AppendOptions {
            producer_id: Some("p1".to_string()),
            epoch: Some(0),
            producer_seq: Some(1),
            ..Default::default()
        };
        let err = store.append("/x", b"b".to_vec(), stale).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleEpoch { .. }));
    }

    #[tokio::test]
    async fn create_on_closed_stream_is_rejected() {
        let store = MemoryStore::new();
        store.create("/x", StreamConfig::default()).await.unwrap();
        store.close("/x", None).await.unwrap();
        let err = store.create("/x", StreamConfig::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::StreamClosed));
    }

    #[tokio::test]
    async fn sweep_removes_expired_streams() {
        let store = MemoryStore::new();
        store
            .create(
                "/expired",
                StreamConfig {
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.create("/fresh", StreamConfig::default()).await.unwrap();

        store.sweep_expired();

        assert!(matches!(store.get("/expired").await, Err(StoreError::NotFound(_))));
        assert!(store.get("/fresh").await.is_ok());
    }

    #[tokio::test]
    async fn ttl_and_expires_at_together_is_rejected_at_create() {
        let store = MemoryStore::new();
        let err = store
            .create(
                "/x",
                StreamConfig {
                    ttl_seconds: Some(60),
                    expires_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TtlConflict));
    }
}
