//! Publish/subscribe event bus with bounded history.
//!
//! Every component announces lifecycle occurrences here; host applications
//! subscribe for observability. Dispatch isolates subscribers from each
//! other and from the publisher: a failing or panicking handler is logged
//! and never aborts dispatch or fails the emit call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Event types published by the core components.
pub mod topic {
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    pub const PIPELINE_STAGE_COMPLETED: &str = "pipeline.stage_completed";
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    pub const PIPELINE_FAILED: &str = "pipeline.failed";

    pub const PLUGIN_LOADED: &str = "plugin.loaded";
    pub const PLUGIN_ENABLED: &str = "plugin.enabled";
    pub const PLUGIN_DISABLED: &str = "plugin.disabled";
    pub const PLUGIN_ERROR: &str = "plugin.error";
}

/// A single event as recorded in history and delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// Event type key (see [`topic`])
    pub event_type: String,

    /// Opaque payload; the bus never interprets it
    pub payload: Value,

    /// When this event was emitted
    pub timestamp: DateTime<Utc>,

    /// Identifier of the emitting component
    pub source: String,

    /// Correlation id for tracing an event across subscribers
    pub correlation_id: Uuid,
}

impl BusEvent {
    fn new(event_type: &str, payload: Value, source: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
            source: source.to_string(),
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// Subscriber callback invoked by the bus for each matching event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> Result<()>;
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub event_type: String,
    pub id: Uuid,
}

struct Subscriber {
    id: Uuid,
    handler: Arc<dyn EventHandler>,
}

/// Typed publish/subscribe hub with bounded, oldest-first history.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    history: RwLock<VecDeque<BusEvent>>,
    max_history: AtomicUsize,
}

/// Default bound on retained history.
pub const DEFAULT_MAX_HISTORY: usize = 100;

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl EventBus {
    /// Create a bus retaining at most `max_history` events.
    pub fn new(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history: AtomicUsize::new(max_history),
        }
    }

    /// Register a handler for an event type. Handlers only receive events
    /// emitted after they subscribe; there is no replay.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(event_type.to_string())
            .or_default()
            .push(Subscriber { id, handler });

        debug!(event_type, subscription = %id, "subscriber registered");
        Subscription {
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(entries) = subscribers.get_mut(&subscription.event_type) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|s| s.id != subscription.id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            subscribers.remove(&subscription.event_type);
        }
        removed
    }

    /// Emit an event and wait for every current subscriber to settle.
    ///
    /// The event is recorded to history before dispatch. Handlers run
    /// concurrently, one task each; failures and panics are logged and do
    /// not fail the call.
    pub async fn emit(&self, event_type: &str, payload: Value, source: &str) -> BusEvent {
        let event = self.record(event_type, payload, source).await;

        let mut tasks = Vec::new();
        for (id, handler) in self.handlers_for(event_type).await {
            let handler_event = event.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = handler.handle(&handler_event).await {
                    warn!(
                        event_type = %handler_event.event_type,
                        subscription = %id,
                        error = %e,
                        "event handler failed"
                    );
                }
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(event_type, error = %e, "event handler panicked");
            }
        }

        event
    }

    /// Emit an event without waiting for subscribers.
    ///
    /// History is recorded before the call returns; dispatch happens on
    /// detached tasks, so the publisher never blocks on a subscriber.
    pub async fn emit_sync(&self, event_type: &str, payload: Value, source: &str) -> BusEvent {
        let event = self.record(event_type, payload, source).await;

        for (id, handler) in self.handlers_for(event_type).await {
            let handler_event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(&handler_event).await {
                    warn!(
                        event_type = %handler_event.event_type,
                        subscription = %id,
                        error = %e,
                        "event handler failed"
                    );
                }
            });
        }

        event
    }

    /// Recorded events, oldest first, optionally filtered by type.
    pub async fn history(&self, event_type: Option<&str>) -> Vec<BusEvent> {
        let history = self.history.read().await;
        match event_type {
            Some(filter) => history
                .iter()
                .filter(|e| e.event_type == filter)
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    /// Drop all recorded events.
    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    /// Number of subscribers per event type.
    pub async fn subscription_counts(&self) -> HashMap<String, usize> {
        self.subscribers
            .read()
            .await
            .iter()
            .map(|(event_type, entries)| (event_type.clone(), entries.len()))
            .collect()
    }

    /// Total number of active subscriptions across all types.
    pub async fn subscription_total(&self) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Drop every subscription (engine shutdown path).
    pub async fn clear_all_subscriptions(&self) {
        self.subscribers.write().await.clear();
    }

    /// Adjust the history bound, trimming oldest entries if needed.
    pub async fn set_max_history(&self, max_history: usize) {
        self.max_history.store(max_history, Ordering::Relaxed);
        let mut history = self.history.write().await;
        while history.len() > max_history {
            history.pop_front();
        }
    }

    async fn record(&self, event_type: &str, payload: Value, source: &str) -> BusEvent {
        let event = BusEvent::new(event_type, payload, source);
        let max = self.max_history.load(Ordering::Relaxed);

        let mut history = self.history.write().await;
        history.push_back(event.clone());
        while history.len() > max {
            history.pop_front();
        }

        event
    }

    async fn handlers_for(&self, event_type: &str) -> Vec<(Uuid, Arc<dyn EventHandler>)> {
        self.subscribers
            .read()
            .await
            .get(event_type)
            .map(|entries| {
                entries
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
