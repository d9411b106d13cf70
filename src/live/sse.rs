//! Server-Sent Events framing for GET `?live=sse`.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;
use tokio::time::timeout;

use crate::cursor::{generate_response_cursor, CursorOptions};
use crate::offset::Offset;
use crate::store::{format_response, StreamStore};

/// Build the SSE event stream for a GET `?live=sse` request. Emits a `data`
/// block per message (as individual JSON values for JSON streams, or as a
/// single opaque payload line otherwise) followed by a `control` block with
/// the current tail/cursor state; closes after `reconnect_interval` of no
/// new data so clients (and any CDN in front of them) re-establish.
pub fn stream(
    store: Arc<dyn StreamStore>,
    path: String,
    mut offset: Offset,
    is_json: bool,
    mut cursor: u64,
    cursor_options: CursorOptions,
    reconnect_interval: Duration,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let Some(mut rx) = store.subscribe(&path) else { return };

        loop {
            let read = match store.read(&path, offset).await {
                Ok(r) => r,
                Err(_) => break,
            };

            for msg in &read.messages {
                let payload = format_response(is_json, std::slice::from_ref(msg));
                let data_str = String::from_utf8_lossy(&payload).into_owned();
                yield Ok(Event::default().event("data").data(data_str));
            }
            if !read.messages.is_empty() {
                offset = read.tail_offset;
            }

            cursor = generate_response_cursor(Some(cursor), &cursor_options);
            let control = serde_json::json!({
                "streamNextOffset": read.tail_offset.format(),
                "streamCursor": cursor.to_string(),
                "upToDate": read.up_to_date,
            });
            yield Ok(Event::default().event("control").data(control.to_string()));

            match timeout(reconnect_interval, rx.recv()).await {
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }
    }
}
