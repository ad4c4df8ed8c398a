use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

pub type NotificationSender = broadcast::Sender<String>;
pub type NotificationReceiver = broadcast::Receiver<String>;

pub const TOKEN_ISSUED: &str = "token_issued";
pub const TOKEN_UPDATED: &str = "token_updated";
pub const OVERRIDE_APPLIED: &str = "override_applied";
pub const TOKENS_CASCADED: &str = "tokens_cascaded";
pub const LIVE_SHIFT_UPDATED: &str = "live_shift_updated";

/// Fire-and-forget fan-out to connected clients. Delivery is never awaited
/// and failures never reach the caller.
pub trait Notifier: Send + Sync {
    fn publish(&self, scope_key: &str, event_name: &str, payload: Value);
}

pub fn queue_channel(institution_id: &str, date: NaiveDate, scope_key: &str) -> String {
    format!("queue:{}:{}:{}", institution_id, date, scope_key)
}

pub fn doctor_channel(institution_id: &str, doctor_id: Uuid) -> String {
    format!("doctor:{}:{}", institution_id, doctor_id)
}

/// In-process notifier backed by tokio broadcast channels, one per scope key
/// plus a global feed for monitoring.
#[derive(Clone)]
pub struct BroadcastNotifier {
    channels: Arc<RwLock<HashMap<String, NotificationSender>>>,
    global_sender: NotificationSender,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(1000);

        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    pub fn subscribe(&self, scope_key: &str) -> NotificationReceiver {
        let mut channels = self.write_channels();
        channels
            .entry(scope_key.to_string())
            .or_insert_with(|| {
                debug!("Created notification channel {}", scope_key);
                broadcast::channel(100).0
            })
            .subscribe()
    }

    pub fn subscribe_global(&self) -> NotificationReceiver {
        self.global_sender.subscribe()
    }

    pub fn remove_channel(&self, scope_key: &str) {
        self.write_channels().remove(scope_key);
        debug!("Removed notification channel {}", scope_key);
    }

    pub fn active_channels(&self) -> Vec<String> {
        self.read_channels().keys().cloned().collect()
    }

    // Writers only insert or remove whole entries; poisoning is ignored.
    fn read_channels(&self) -> RwLockReadGuard<'_, HashMap<String, NotificationSender>> {
        self.channels.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_channels(&self) -> RwLockWriteGuard<'_, HashMap<String, NotificationSender>> {
        self.channels.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, scope_key: &str, event_name: &str, payload: Value) {
        let message = json!({
            "scope": scope_key,
            "event": event_name,
            "timestamp": Utc::now().to_rfc3339(),
            "data": payload,
        })
        .to_string();

        {
            let channels = self.read_channels();
            if let Some(sender) = channels.get(scope_key) {
                if let Err(e) = sender.send(message.clone()) {
                    debug!("No live subscribers on {}: {}", scope_key, e);
                }
            }
        }

        if let Err(e) = self.global_sender.send(message) {
            debug!("Failed to send to global channel: {}", e);
        }

        debug!("Published {} on {}", event_name, scope_key);
    }
}
