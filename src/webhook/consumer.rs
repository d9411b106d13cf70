//! Per-(subscription, stream) consumer state machine (spec §4.5.4):
//! IDLE -> WAKING on pending work, WAKING -> LIVE once the callback is
//! claimed, LIVE -> IDLE on liveness timeout. Exactly one callback is
//! ever in flight per consumer.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::offset::{self, Offset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Waking,
    Live,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("wake_id does not match the consumer's current wake")]
    WakeMismatch,
}

/// A per-(subscription, stream_path) consumer instance.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub consumer_id: String,
    pub subscription_id: String,
    pub primary_stream: String,
    pub state: ConsumerState,
    pub epoch: u64,
    pub wake_id: Option<String>,
    pub wake_id_claimed: bool,
    /// Last-acknowledged offset per subscribed stream path.
    pub streams: HashMap<String, Offset>,
    pub last_callback_at: Option<i64>,
    /// Consecutive failed-callback attempts, reset on a successful claim.
    pub attempt: u32,
    /// Offsets to ack once the in-flight wake is claimed; set at wake time.
    pending_acks: Vec<(String, Offset)>,
}

impl Consumer {
    pub fn new(consumer_id: String, subscription_id: String, primary_stream: String) -> Self {
        let mut streams = HashMap::new();
        streams.insert(primary_stream.clone(), Offset::zero());
        Self {
            consumer_id,
            subscription_id,
            primary_stream,
            state: ConsumerState::Idle,
            epoch: 0,
            wake_id: None,
            wake_id_claimed: false,
            streams,
            last_callback_at: None,
            attempt: 0,
            pending_acks: Vec::new(),
        }
    }

    /// Records the offsets a just-sent wake is delivering, so they can be
    /// acked once the consumer claims it.
    pub fn set_pending_acks(&mut self, acks: Vec<(String, Offset)>) {
        self.pending_acks = acks;
    }

    /// True if any subscribed stream's current tail is past the last
    /// offset this consumer acknowledged for it.
    pub fn has_pending_work(&self, tails: &HashMap<String, Offset>) -> bool {
        self.streams.iter().any(|(path, acked)| {
            tails
                .get(path)
                .map(|tail| offset::compare(tail, acked) == Some(std::cmp::Ordering::Greater))
                .unwrap_or(false)
        })
    }

    /// IDLE -> WAKING. Returns the freshly minted wake_id for the callback.
    pub fn begin_wake(&mut self) -> String {
        self.epoch += 1;
        let wake_id = new_wake_id();
        self.wake_id = Some(wake_id.clone());
        self.wake_id_claimed = false;
        self.state = ConsumerState::Waking;
        wake_id
    }

    /// WAKING retry_timeout: resend with the same epoch, a new wake_id.
    pub fn retry_wake(&mut self) -> String {
        let wake_id = new_wake_id();
        self.wake_id = Some(wake_id.clone());
        self.wake_id_claimed = false;
        self.attempt += 1;
        wake_id
    }

    pub fn claim(&mut self, wake_id: &str, now_millis: i64) -> Result<(), ClaimError> {
        if self.wake_id.as_deref() != Some(wake_id) {
            return Err(ClaimError::WakeMismatch);
        }
        self.attempt = 0;
        if self.wake_id_claimed {
            return Ok(());
        }
        self.wake_id_claimed = true;
        self.last_callback_at = Some(now_millis);
        self.state = ConsumerState::Live;
        let acks = std::mem::take(&mut self.pending_acks);
        self.ack(&acks);
        Ok(())
    }

    /// LIVE liveness_timeout: drop back to IDLE, clearing the wake.
    pub fn liveness_timeout(&mut self) {
        self.state = ConsumerState::Idle;
        self.wake_id = None;
        self.wake_id_claimed = false;
    }

    /// LIVE callback_completed: advance per-stream acked offsets.
    pub fn ack(&mut self, acks: &[(String, Offset)]) {
        for (path, offset) in acks {
            self.streams.insert(path.clone(), *offset);
        }
    }
}

fn new_wake_id() -> String {
    Uuid::new_v4().to_string()
}

/// Exponential backoff with full jitter, base 1s, cap 60s (spec §5).
pub fn backoff_duration(attempt: u32) -> Duration {
    let base_ms: u64 = 1_000;
    let cap_ms: u64 = 60_000;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
    let capped_ms = exp_ms.min(cap_ms);
    let jittered_ms = rand::thread_rng().gen_range(0..=capped_ms.max(1));
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> Consumer {
        Consumer::new("sub:%2Fa".to_string(), "sub".to_string(), "/a".to_string())
    }

    #[test]
    fn pending_work_compares_tail_against_acked() {
        let c = consumer();
        let mut tails = HashMap::new();
        tails.insert("/a".to_string(), Offset::zero());
        assert!(!c.has_pending_work(&tails));
        tails.insert("/a".to_string(), Offset::At(0, 5));
        assert!(c.has_pending_work(&tails));
    }

    #[test]
    fn begin_wake_increments_epoch_and_enters_waking() {
        let mut c = consumer();
        let wake_id = c.begin_wake();
        assert_eq!(c.epoch, 1);
        assert_eq!(c.state, ConsumerState::Waking);
        assert_eq!(c.wake_id.as_deref(), Some(wake_id.as_str()));
    }

    #[test]
    fn claim_with_matching_wake_id_transitions_to_live() {
        let mut c = consumer();
        let wake_id = c.begin_wake();
        c.claim(&wake_id, 0).unwrap();
        assert_eq!(c.state, ConsumerState::Live);
        assert!(c.wake_id_claimed);
    }

    #[test]
    fn reclaim_with_same_wake_id_is_idempotent() {
        let mut c = consumer();
        let wake_id = c.begin_wake();
        c.claim(&wake_id, 0).unwrap();
        c.claim(&wake_id, 100).unwrap();
        assert_eq!(c.state, ConsumerState::Live);
    }

    #[test]
    fn claim_with_wrong_wake_id_is_rejected() {
        let mut c = consumer();
        c.begin_wake();
        assert_eq!(c.claim("not-the-wake-id", 0).unwrap_err(), ClaimError::WakeMismatch);
        assert_eq!(c.state, ConsumerState::Waking);
    }

    #[test]
    fn claim_advances_acked_offsets_from_pending_acks() {
        let mut c = consumer();
        let wake_id = c.begin_wake();
        c.set_pending_acks(vec![("/a".to_string(), Offset::At(0, 5))]);
        c.claim(&wake_id, 0).unwrap();
        assert_eq!(c.streams.get("/a"), Some(&Offset::At(0, 5)));
    }

    #[test]
    fn reclaim_does_not_reapply_stale_pending_acks() {
        let mut c = consumer();
        let wake_id = c.begin_wake();
        c.set_pending_acks(vec![("/a".to_string(), Offset::At(0, 5))]);
        c.claim(&wake_id, 0).unwrap();
        c.set_pending_acks(vec![("/a".to_string(), Offset::At(0, 1))]);
        c.claim(&wake_id, 100).unwrap();
        assert_eq!(c.streams.get("/a"), Some(&Offset::At(0, 5)));
    }

    #[test]
    fn liveness_timeout_drops_to_idle() {
        let mut c = consumer();
        let wake_id = c.begin_wake();
        c.claim(&wake_id, 0).unwrap();
        c.liveness_timeout();
        assert_eq!(c.state, ConsumerState::Idle);
        assert!(c.wake_id.is_none());
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        for attempt in 0..20 {
            assert!(backoff_duration(attempt) <= Duration::from_millis(60_000));
        }
    }
}
