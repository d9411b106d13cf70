//! Durable Streams Server
//!
//! Persistent, resumable, append-only byte streams over HTTP: create,
//! append, read, and close a named stream; tail it live over long-poll or
//! Server-Sent Events; fence concurrent producers with an idempotent
//! `(producer_id, epoch, seq)` triple; fan out appends to webhook
//! subscribers.
//!
//! # Example
//!
//! ```rust,no_run
//! use durable_streams::protocol::{create_router, AppState};
//! use durable_streams::store::memory::MemoryStore;
//! use durable_streams::types::ServerOptions;
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ServerOptions::default();
//!     let state = AppState { store: MemoryStore::new(), options, webhooks: None };
//!     let app = create_router(state);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4437").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Creating a stream
//!
//! ```text
//! PUT /stream/my-events HTTP/1.1
//! Content-Type: application/json
//! Stream-TTL: 3600
//!
//! Response: 201 Created
//! Stream-Next-Offset: 0_0
//! ```
//!
//! ## Appending data
//!
//! ```text
//! POST /stream/my-events HTTP/1.1
//! Content-Type: application/json
//!
//! {"event": "user_created", "id": 123}
//!
//! Response: 200 OK
//! Stream-Next-Offset: 0_36
//! ```
//!
//! ## Reading data
//!
//! ```text
//! GET /stream/my-events?offset=-1 HTTP/1.1
//!
//! Response: 200 OK
//! Stream-Next-Offset: 0_36
//! Content-Type: application/json
//!
//! [{"event": "user_created", "id": 123}]
//! ```
//!
//! ## Long-polling
//!
//! ```text
//! GET /stream/my-events?offset=0_36&live=long-poll HTTP/1.1
//!
//! (waits up to 30 seconds for new data)
//!
//! Response: 204 No Content (if no new data)
//! Stream-Up-To-Date: true
//! ```
//!
//! ## Server-Sent Events
//!
//! ```text
//! GET /stream/my-events?offset=-1&live=sse HTTP/1.1
//! Accept: text/event-stream
//!
//! event: data
//! data: {"event": "user_created", "id": 123}
//!
//! event: control
//! data: {"streamNextOffset": "0_36", "streamCursor": "123", "upToDate": true}
//! ```

pub mod cursor;
pub mod error;
pub mod live;
pub mod offset;
pub mod path_encoding;
pub mod protocol;
pub mod store;
pub mod types;
pub mod webhook;

pub use error::ApiError;
pub use offset::Offset;
pub use protocol::{create_router, AppState};
pub use store::{StoreError, StreamStore};
pub use types::{
    AppendOptions, AppendResult, ReadResult, ServerOptions, Stream, StreamConfig,
    StreamLifecycleEvent, StreamMessage, WaitResult,
};
