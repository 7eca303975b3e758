//! In-memory notify queue for testing and embedding.
//!
//! ## Limitations
//!
//! - **Single-process only**: Messages are not visible across process boundaries
//! - **No persistence**: All messages are lost when the process exits

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ClaimedEvent, NotifyQueue, DEFAULT_LEASE_MS};
use crate::model::NotifyEvent;

#[derive(Debug, Clone)]
struct Message {
    id: Uuid,
    event: NotifyEvent,
    attempt: i32,
    visible_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Lease {
    message: Message,
    worker_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Ready messages per topic.
    ready: HashMap<String, VecDeque<Message>>,
    in_flight: HashMap<Uuid, Lease>,
    /// Every event ever published, in order. Only kept by recording queues.
    history: Option<Vec<NotifyEvent>>,
}

fn poison_err<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("notify queue lock poisoned")
}

/// In-memory notify queue with lease-based redelivery.
///
/// Acknowledged messages are dropped. Use [`MemoryNotifyQueue::recording`]
/// to also keep a log of everything published for inspection.
#[derive(Debug)]
pub struct MemoryNotifyQueue {
    state: Mutex<QueueState>,
    lease_duration: Duration,
}

impl Default for MemoryNotifyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNotifyQueue {
    pub fn new() -> Self {
        Self::with_lease_duration(Duration::from_millis(DEFAULT_LEASE_MS as u64))
    }

    /// Create a queue whose claimed messages reappear after `lease_duration`
    /// unless acknowledged.
    pub fn with_lease_duration(lease_duration: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease_duration,
        }
    }

    /// A queue that also remembers every published event. Memory grows with
    /// each publish, so this is for tests.
    pub fn recording() -> Self {
        Self::new().with_history()
    }

    /// Start keeping a log of published events from now on.
    pub fn with_history(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.history.get_or_insert_with(Vec::new);
        }
        self
    }

    /// Messages waiting to be claimed, across all topics.
    pub fn pending_len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.ready.values().map(VecDeque::len).sum())
            .unwrap_or_default()
    }

    /// Messages claimed but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.in_flight.len())
            .unwrap_or_default()
    }

    /// True if nothing is ready and nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.ready.values().all(VecDeque::is_empty) && s.in_flight.is_empty())
            .unwrap_or(false)
    }

    /// Topics that currently hold ready messages.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .state
            .lock()
            .map(|s| {
                s.ready
                    .iter()
                    .filter(|(_, messages)| !messages.is_empty())
                    .map(|(topic, _)| topic.clone())
                    .collect()
            })
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Every event published so far, including acknowledged ones. Empty
    /// unless the queue was built with [`MemoryNotifyQueue::recording`].
    pub fn published(&self) -> Vec<NotifyEvent> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Number of events held in the published log.
    pub fn history_len(&self) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.history.as_ref().map(Vec::len))
            .unwrap_or_default()
    }

    /// Remove and return every ready message without leasing it.
    pub fn drain_ready(&self) -> Vec<NotifyEvent> {
        self.state
            .lock()
            .map(|mut s| {
                s.ready
                    .values_mut()
                    .flat_map(|messages| messages.drain(..).map(|m| m.event))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_duration)
            .unwrap_or(chrono::Duration::milliseconds(DEFAULT_LEASE_MS))
    }
}

#[async_trait]
impl NotifyQueue for MemoryNotifyQueue {
    async fn publish(&self, event: NotifyEvent) -> Result<Uuid> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let id = Uuid::now_v7();
        if let Some(history) = state.history.as_mut() {
            history.push(event.clone());
        }
        let topic = event.publisher.clone();
        state.ready.entry(topic).or_default().push_back(Message {
            id,
            event,
            attempt: 0,
            visible_at: Utc::now(),
        });
        Ok(id)
    }

    async fn claim(&self, topic: &str, worker_id: &str, limit: usize) -> Result<Vec<ClaimedEvent>> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let now = Utc::now();

        // Expired leases go back to the front: they are the oldest messages.
        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = state.in_flight.remove(&id) {
                let mut message = lease.message;
                message.visible_at = lease.expires_at;
                state
                    .ready
                    .entry(message.event.publisher.clone())
                    .or_default()
                    .push_front(message);
            }
        }

        let mut claimed = Vec::new();
        while claimed.len() < limit {
            let Some(mut message) = state.ready.get_mut(topic).and_then(VecDeque::pop_front) else {
                break;
            };
            message.attempt += 1;
            claimed.push(ClaimedEvent {
                message_id: message.id,
                event: message.event.clone(),
                attempt: message.attempt,
                priority: 0,
                visible_at: message.visible_at,
            });
            state.in_flight.insert(
                message.id,
                Lease {
                    message,
                    worker_id: worker_id.to_string(),
                    expires_at: self.lease_expiry(now),
                },
            );
        }

        Ok(claimed)
    }

    async fn ack(&self, message_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if let Some(lease) = state.in_flight.remove(&message_id) {
            tracing::trace!(message_id = %message_id, worker_id = %lease.worker_id, "message acknowledged");
        }
        Ok(())
    }
}
