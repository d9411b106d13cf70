//! Long-poll GET handling: wait for new messages past the requested offset,
//! or time out with an empty 204.

use std::sync::Arc;
use std::time::Duration;

use crate::cursor::{generate_response_cursor, CursorOptions};
use crate::offset::Offset;
use crate::store::{StoreError, StreamStore};
use crate::types::Stream;

pub struct LongPollResponse {
    pub messages: Vec<crate::types::StreamMessage>,
    pub next_offset: Offset,
    pub up_to_date: bool,
    pub timed_out: bool,
    pub cursor: u64,
    pub stream: Stream,
}

/// Block for up to `timeout` waiting for data past `from_offset`. Cancelling
/// the calling future (client disconnect) cancels the wait — there is no
/// separate cancellation channel to thread through; dropping this future
/// drops the underlying `wait_for_messages` call along with it.
pub async fn handle(
    store: &Arc<dyn StreamStore>,
    stream: Stream,
    from_offset: Offset,
    timeout: Duration,
    client_cursor: Option<u64>,
    cursor_options: &CursorOptions,
) -> Result<LongPollResponse, StoreError> {
    let result = store.wait_for_messages(&stream.path, from_offset, timeout).await?;
    let cursor = generate_response_cursor(client_cursor, cursor_options);
    let up_to_date = result.messages.is_empty();
    Ok(LongPollResponse {
        messages: result.messages,
        next_offset: result.tail_offset,
        up_to_date,
        timed_out: result.timed_out,
        cursor,
        stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{AppendOptions, StreamConfig};

    #[tokio::test]
    async fn wakes_immediately_on_pending_data() {
        let store: Arc<dyn StreamStore> = MemoryStore::new();
        let (stream, _) = store.create("/x", StreamConfig::default()).await.unwrap();
        store.append("/x", b"a".to_vec(), AppendOptions::default()).await.unwrap();

        let result = handle(
            &store,
            stream,
            Offset::Beginning,
            Duration::from_secs(1),
            None,
            &CursorOptions::default(),
        )
        .await
        .unwrap();

        assert!(!result.timed_out);
        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn times_out_with_no_data() {
        let store: Arc<dyn StreamStore> = MemoryStore::new();
        let (stream, _) = store.create("/x", StreamConfig::default()).await.unwrap();
        let tail = stream.current_offset;

        let result = handle(
            &store,
            stream,
            tail,
            Duration::from_millis(30),
            None,
            &CursorOptions::default(),
        )
        .await
        .unwrap();

        assert!(result.timed_out);
        assert!(result.up_to_date);
    }
}
