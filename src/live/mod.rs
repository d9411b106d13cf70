//! Live-follow transports: long-poll and Server-Sent Events.

pub mod long_poll;
pub mod sse;
