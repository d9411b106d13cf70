//! Webhook subscription manager: glob-matches appends against subscription
//! patterns, drives the per-consumer state machine, and delivers
//! HMAC-signed callbacks. See `consumer.rs` for the state machine and
//! `token.rs` for the callback-token format.

pub mod consumer;
pub mod glob;
pub mod token;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::offset::Offset;
use crate::protocol::AppState;
use crate::store::StreamStore;

use consumer::{ClaimError, Consumer, ConsumerState};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub pattern: String,
    pub webhook_url: String,
    pub webhook_secret: String,
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error("subscription already exists with a different pattern or webhook_url")]
    SubscriptionConflict,
    #[error("wake_id does not match the consumer's current wake")]
    WakeMismatch,
    #[error("token is invalid")]
    TokenInvalid,
    #[error("token has expired")]
    TokenExpired,
    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::SubscriptionNotFound(_) | WebhookError::ConsumerNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            WebhookError::SubscriptionConflict => ApiError::Conflict(e.to_string()),
            WebhookError::WakeMismatch | WebhookError::TokenInvalid | WebhookError::TokenExpired => {
                ApiError::Forbidden(e.to_string())
            }
        }
    }
}

/// Owns subscriptions and their consumer instances, and drives callback
/// delivery. Constructed only when `webhook_callback_url` is configured;
/// `AppState.webhooks` is `None` otherwise and the `/_webhooks/*` surface
/// answers 404.
pub struct WebhookManager {
    store: Arc<dyn StreamStore>,
    http: reqwest::Client,
    process_token_key: [u8; 32],
    subscriptions: RwLock<HashMap<String, Subscription>>,
    consumers: RwLock<HashMap<String, Arc<AsyncMutex<Consumer>>>>,
    liveness_timeout: Duration,
    callback_timeout: Duration,
}

impl WebhookManager {
    pub fn new(store: Arc<dyn StreamStore>) -> Arc<Self> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Arc::new(Self {
            store,
            http: reqwest::Client::new(),
            process_token_key: key,
            subscriptions: RwLock::new(HashMap::new()),
            consumers: RwLock::new(HashMap::new()),
            liveness_timeout: Duration::from_secs(90),
            callback_timeout: Duration::from_secs(10),
        })
    }

    pub fn create_subscription(
        &self,
        subscription_id: String,
        pattern: String,
        webhook_url: String,
        description: Option<String>,
    ) -> Result<Subscription, WebhookError> {
        let mut subscriptions = self.subscriptions.write();
        if let Some(existing) = subscriptions.get(&subscription_id) {
            if existing.pattern == pattern && existing.webhook_url == webhook_url {
                return Ok(existing.clone());
            }
            return Err(WebhookError::SubscriptionConflict);
        }

        let subscription = Subscription {
            subscription_id: subscription_id.clone(),
            pattern,
            webhook_url,
            webhook_secret: new_webhook_secret(),
            description,
        };
        subscriptions.insert(subscription_id, subscription.clone());
        Ok(subscription)
    }

    pub fn list_subscriptions(&self, pattern_filter: Option<&str>) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| pattern_filter.map(|p| p == s.pattern).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn delete_subscription(&self, subscription_id: &str) -> Result<(), WebhookError> {
        let removed = self.subscriptions.write().remove(subscription_id).is_some();
        if !removed {
            return Err(WebhookError::SubscriptionNotFound(subscription_id.to_string()));
        }
        self.consumers.write().retain(|_, c| {
            // Retained consumers are those NOT belonging to the removed subscription;
            // best-effort check without awaiting the per-consumer lock.
            c.try_lock().map(|g| g.subscription_id != subscription_id).unwrap_or(true)
        });
        Ok(())
    }

    pub async fn claim(self: &Arc<Self>, consumer_id: &str, wake_id: &str, token: &str) -> Result<(), WebhookError> {
        let payload = token::verify(token, &self.process_token_key, consumer_id)
            .map_err(|e| match e {
                token::TokenError::Invalid => WebhookError::TokenInvalid,
                token::TokenError::Expired => WebhookError::TokenExpired,
            })?;

        let consumer = self
            .consumers
            .read()
            .get(consumer_id)
            .cloned()
            .ok_or_else(|| WebhookError::ConsumerNotFound(consumer_id.to_string()))?;

        let mut guard = consumer.lock().await;
        if guard.epoch != payload.epoch {
            return Err(WebhookError::WakeMismatch);
        }
        guard.claim(wake_id, Utc::now().timestamp_millis()).map_err(|e| match e {
            ClaimError::WakeMismatch => WebhookError::WakeMismatch,
        })?;
        let state = guard.state;
        drop(guard);

        if state == ConsumerState::Live {
            self.clone().spawn_liveness_timer(consumer_id.to_string(), consumer);
        }
        Ok(())
    }

    /// Matches `path` against every subscription pattern and, for each
    /// match, drives that (subscription, path) consumer's state machine.
    pub async fn notify_append(self: &Arc<Self>, path: &str, tail: Offset) {
        let matches: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| glob::matches(&s.pattern, path))
            .cloned()
            .collect();

        for subscription in matches {
            let consumer_id = format!("{}:{}", subscription.subscription_id, percent_encode(path));
            let consumer = {
                let mut consumers = self.consumers.write();
                consumers
                    .entry(consumer_id.clone())
                    .or_insert_with(|| {
                        Arc::new(AsyncMutex::new(Consumer::new(
                            consumer_id.clone(),
                            subscription.subscription_id.clone(),
                            path.to_string(),
                        )))
                    })
                    .clone()
            };

            let mut tails = HashMap::new();
            tails.insert(path.to_string(), tail);

            let mut guard = consumer.lock().await;
            if guard.state != ConsumerState::Idle || !guard.has_pending_work(&tails) {
                continue;
            }
            let wake_id = guard.begin_wake();
            let epoch = guard.epoch;
            let acks: Vec<(String, Offset)> = guard.streams.keys().map(|p| (p.clone(), tail)).collect();
            guard.set_pending_acks(acks.clone());
            drop(guard);

            self.clone().spawn_delivery(consumer_id, subscription, epoch, wake_id, acks);
        }
    }

    fn spawn_delivery(
        self: Arc<Self>,
        consumer_id: String,
        subscription: Subscription,
        mut epoch: u64,
        mut wake_id: String,
        acks: Vec<(String, Offset)>,
    ) {
        tokio::spawn(async move {
            loop {
                match self.deliver(&consumer_id, &subscription, epoch, &wake_id, &acks).await {
                    Ok(()) => return,
                    Err(e) => warn!(consumer_id = %consumer_id, error = %e, "webhook callback failed"),
                }

                let Some(consumer) = self.consumers.read().get(&consumer_id).cloned() else { return };
                let mut guard = consumer.lock().await;
                if guard.state != ConsumerState::Waking || guard.epoch != epoch {
                    return;
                }
                let attempt = guard.attempt;
                wake_id = guard.retry_wake();
                epoch = guard.epoch;
                drop(guard);

                tokio::time::sleep(consumer::backoff_duration(attempt)).await;
            }
        });
    }

    fn spawn_liveness_timer(self: Arc<Self>, consumer_id: String, consumer: Arc<AsyncMutex<Consumer>>) {
        let timeout = self.liveness_timeout;
        tokio::spawn(async move {
            let claimed_at = consumer.lock().await.last_callback_at;
            tokio::time::sleep(timeout).await;

            let mut guard = consumer.lock().await;
            if guard.state == ConsumerState::Live && guard.last_callback_at == claimed_at {
                guard.liveness_timeout();
                info!(%consumer_id, "webhook consumer liveness timed out");
            }
        });
    }

    async fn deliver(
        &self,
        consumer_id: &str,
        subscription: &Subscription,
        epoch: u64,
        wake_id: &str,
        acks: &[(String, Offset)],
    ) -> Result<(), reqwest::Error> {
        let token = token::mint(consumer_id, epoch, &self.process_token_key);
        let body = serde_json::json!({
            "consumer_id": consumer_id,
            "epoch": epoch,
            "wake_id": wake_id,
            "token": token,
            "acks": acks.iter().map(|(p, o)| serde_json::json!({"path": p, "offset": o.format()})).collect::<Vec<_>>(),
        });
        let raw_body = body.to_string();
        let ts = Utc::now().timestamp();
        let signature = sign(subscription.webhook_secret.as_bytes(), ts, &raw_body);

        let response = self
            .http
            .post(&subscription.webhook_url)
            .header("Content-Type", "application/json")
            .header("Signature", format!("t={ts},sha256={signature}"))
            .timeout(self.callback_timeout)
            .body(raw_body)
            .send()
            .await?;

        response.error_for_status().map(|_| ())
    }
}

fn sign(secret: &[u8], unix_ts: i64, raw_body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(format!("{unix_ts}.{raw_body}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn new_webhook_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

fn percent_encode(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn mount(router: Router<AppState>, _state: AppState) -> Router<AppState> {
    router
        .route("/_webhooks/subscriptions", post(create_subscription_handler).get(list_subscriptions_handler))
        .route("/_webhooks/subscriptions/{id}", delete(delete_subscription_handler))
        .route("/_webhooks/claim", post(claim_handler))
}

#[derive(Debug, Deserialize)]
struct CreateSubscriptionRequest {
    subscription_id: String,
    pattern: String,
    webhook_url: String,
    description: Option<String>,
}

async fn create_subscription_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Response, ApiError> {
    let manager = webhooks(&state)?;
    let subscription =
        manager.create_subscription(req.subscription_id, req.pattern, req.webhook_url, req.description)?;
    Ok((StatusCode::CREATED, Json(subscription)).into_response())
}

#[derive(Debug, Deserialize, Default)]
struct ListSubscriptionsQuery {
    pattern: Option<String>,
}

async fn list_subscriptions_handler(
    State(state): State<AppState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Response, ApiError> {
    let manager = webhooks(&state)?;
    let subscriptions = manager.list_subscriptions(query.pattern.as_deref());
    Ok(Json(subscriptions).into_response())
}

async fn delete_subscription_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let manager = webhooks(&state)?;
    manager.delete_subscription(&id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    consumer_id: String,
    wake_id: String,
    token: String,
}

async fn claim_handler(State(state): State<AppState>, Json(req): Json<ClaimRequest>) -> Result<Response, ApiError> {
    let manager = webhooks(&state)?;
    manager.claim(&req.consumer_id, &req.wake_id, &req.token).await?;
    Ok(StatusCode::OK.into_response())
}

fn webhooks(state: &AppState) -> Result<Arc<WebhookManager>, ApiError> {
    state
        .webhooks
        .clone()
        .ok_or_else(|| ApiError::NotFound("webhook subsystem is not enabled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encode_escapes_slashes() {
        assert_eq!(percent_encode("/s/a"), "%2Fs%2Fa");
    }

    #[test]
    fn subscription_creation_is_idempotent_for_matching_fields() {
        let manager = WebhookManager::new(crate::store::memory::MemoryStore::new());
        let a = manager
            .create_subscription("sub1".into(), "/s/**".into(), "https://example.com/cb".into(), None)
            .unwrap();
        let b = manager
            .create_subscription("sub1".into(), "/s/**".into(), "https://example.com/cb".into(), None)
            .unwrap();
        assert_eq!(a.webhook_secret, b.webhook_secret);
    }

    #[test]
    fn subscription_creation_conflicts_on_changed_fields() {
        let manager = WebhookManager::new(crate::store::memory::MemoryStore::new());
        manager
            .create_subscription("sub1".into(), "/s/**".into(), "https://example.com/cb".into(), None)
            .unwrap();
        let err = manager
            .create_subscription("sub1".into(), "/other/**".into(), "https://example.com/cb".into(), None)
            .unwrap_err();
        assert!(matches!(err, WebhookError::SubscriptionConflict));
    }

    #[tokio::test]
    async fn claim_with_unknown_consumer_is_rejected() {
        let manager = WebhookManager::new(crate::store::memory::MemoryStore::new());
        let token = token::mint("nope", 0, &manager.process_token_key);
        let err = manager.claim("nope", "wake", &token).await.unwrap_err();
        assert!(matches!(err, WebhookError::ConsumerNotFound(_)));
    }
}
