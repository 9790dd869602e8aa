//! Fan-out of pipeline events to live observers.
//!
//! Observers join a per-session channel, the global channel, or both; every
//! publish goes to the union of the two memberships. Delivery is best-effort
//! and at-least-once: there is no durable queue, and observers that reconnect
//! are expected to re-fetch current state over HTTP.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::exam_attempt::{AttemptStatus, Violation};

pub type ObserverId = Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LiveEvent {
    #[serde(rename_all = "camelCase")]
    StudentJoined {
        session_id: Uuid,
        attempt_id: Uuid,
        student_name: Option<String>,
        student_id: Option<String>,
        started_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StudentLeft {
        session_id: Uuid,
        attempt_id: Uuid,
        status: AttemptStatus,
        ended_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    Violation {
        session_id: Uuid,
        attempt_id: Uuid,
        violation: Violation,
        violation_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    StudentHeartbeat {
        session_id: Uuid,
        attempt_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Default)]
struct Registry {
    observers: HashMap<ObserverId, mpsc::UnboundedSender<LiveEvent>>,
    session_channels: HashMap<Uuid, HashSet<ObserverId>>,
    global: HashSet<ObserverId>,
}

impl Registry {
    fn forget(&mut self, observer: ObserverId) {
        self.observers.remove(&observer);
        self.global.remove(&observer);
        for members in self.session_channels.values_mut() {
            members.remove(&observer);
        }
        self.session_channels.retain(|_, members| !members.is_empty());
    }
}

#[derive(Default)]
pub struct Broadcaster {
    registry: Mutex<Registry>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and hand back its event stream. The observer
    /// receives nothing until it joins a channel.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.registry
            .lock()
            .expect("broadcast registry mutex poisoned")
            .observers
            .insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, observer: ObserverId) {
        self.registry
            .lock()
            .expect("broadcast registry mutex poisoned")
            .forget(observer);
    }

    pub fn join_session(&self, observer: ObserverId, session_id: Uuid) {
        let mut registry = self
            .registry
            .lock()
            .expect("broadcast registry mutex poisoned");
        if registry.observers.contains_key(&observer) {
            registry
                .session_channels
                .entry(session_id)
                .or_default()
                .insert(observer);
        }
    }

    pub fn leave_session(&self, observer: ObserverId, session_id: Uuid) {
        let mut registry = self
            .registry
            .lock()
            .expect("broadcast registry mutex poisoned");
        if let Some(members) = registry.session_channels.get_mut(&session_id) {
            members.remove(&observer);
            if members.is_empty() {
                registry.session_channels.remove(&session_id);
            }
        }
    }

    pub fn join_global(&self, observer: ObserverId) {
        let mut registry = self
            .registry
            .lock()
            .expect("broadcast registry mutex poisoned");
        if registry.observers.contains_key(&observer) {
            registry.global.insert(observer);
        }
    }

    /// Deliver an event to the session channel and the global channel.
    pub fn publish(&self, session_id: Uuid, event: LiveEvent) {
        let mut registry = self
            .registry
            .lock()
            .expect("broadcast registry mutex poisoned");

        let mut targets: HashSet<ObserverId> = registry.global.iter().copied().collect();
        if let Some(members) = registry.session_channels.get(&session_id) {
            targets.extend(members.iter().copied());
        }

        let mut dead = Vec::new();
        for observer in targets {
            if let Some(tx) = registry.observers.get(&observer) {
                if tx.send(event.clone()).is_err() {
                    dead.push(observer);
                }
            }
        }
        for observer in dead {
            tracing::debug!(%observer, "dropping disconnected observer");
            registry.forget(observer);
        }
    }
}
