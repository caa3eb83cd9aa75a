//! # Distribution Gateway
//!
//! Fan-out of artifact updates to discipline clients. Each subscriber gets
//! a bounded event buffer; events carry a per-subscriber monotonic sequence
//! number for at-least-once dedup.
//!
//! A subscriber that stops draining its buffer is never allowed to queue
//! without bound: once its buffer is full the gateway drops to a single
//! `Resync` signal, delivered as soon as space frees, and the client must
//! re-fetch full state with `get_latest`.
//!
//! Events are published strictly after a pass commits, so a client that
//! observes an `ArtifactUpdated` event and immediately queries the artifact
//! always sees a value at least as new as the event's provenance.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact::ProvenanceVector;
use crate::derivation::registry::ArtifactKind;
use crate::errors::EngineError;
use crate::value::{ArtifactId, Revision};

// ============================================================================
// Events
// ============================================================================

/// What happened to an artifact (or to the subscriber's own stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EventPayload {
    /// An artifact committed a fresh value
    ArtifactUpdated {
        artifact_id: ArtifactId,
        kind: ArtifactKind,
        revision: Revision,
        provenance: ProvenanceVector,
    },
    /// An artifact's derivation failed; it keeps its last-known-good value
    ArtifactFailed {
        artifact_id: ArtifactId,
        kind: ArtifactKind,
        reason: String,
    },
    /// The subscriber overflowed its buffer and must re-fetch full state
    Resync,
}

impl EventPayload {
    /// The kind this event is about, if it concerns a single artifact.
    fn kind(&self) -> Option<ArtifactKind> {
        match self {
            EventPayload::ArtifactUpdated { kind, .. } => Some(*kind),
            EventPayload::ArtifactFailed { kind, .. } => Some(*kind),
            EventPayload::Resync => None,
        }
    }
}

/// One delivered event: payload plus per-subscriber sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    /// Monotonically increasing per subscriber; gaps mean dropped events
    /// (which are always followed by a `Resync`)
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// A live subscription: keep the receiver, drop it to unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    pub subscriber_id: Uuid,
    pub client_id: String,
    pub receiver: mpsc::Receiver<SubscriptionEvent>,
}

// ============================================================================
// Gateway
// ============================================================================

struct Subscriber {
    client_id: String,
    /// Empty set subscribes to every kind
    kinds: HashSet<ArtifactKind>,
    tx: mpsc::Sender<SubscriptionEvent>,
    next_sequence: AtomicU64,
    needs_resync: AtomicBool,
}

impl Subscriber {
    fn wants(&self, payload: &EventPayload) -> bool {
        match payload.kind() {
            Some(kind) => self.kinds.is_empty() || self.kinds.contains(&kind),
            None => true,
        }
    }

    fn stamp(&self, payload: EventPayload) -> SubscriptionEvent {
        SubscriptionEvent {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Per-subscriber bounded fan-out of pass results.
pub struct Gateway {
    subscribers: DashMap<Uuid, Subscriber>,
    buffer_capacity: usize,
}

impl Gateway {
    pub fn new(buffer_capacity: usize) -> Self {
        Gateway {
            subscribers: DashMap::new(),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Register a subscriber for the given kinds (empty = all kinds).
    pub fn subscribe(&self, client_id: impl Into<String>, kinds: &[ArtifactKind]) -> Subscription {
        let client_id = client_id.into();
        let subscriber_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        self.subscribers.insert(
            subscriber_id,
            Subscriber {
                client_id: client_id.clone(),
                kinds: kinds.iter().copied().collect(),
                tx,
                next_sequence: AtomicU64::new(1),
                needs_resync: AtomicBool::new(false),
            },
        );
        debug!(client = %client_id, %subscriber_id, "subscriber registered");
        Subscription {
            subscriber_id,
            client_id,
            receiver: rx,
        }
    }

    pub fn unsubscribe(&self, subscriber_id: &Uuid) {
        self.subscribers.remove(subscriber_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver a committed batch to every matching subscriber.
    ///
    /// Never blocks the pass: full buffers flip the subscriber into resync
    /// mode, closed channels drop the subscriber.
    pub fn publish(&self, batch: &[EventPayload]) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            let (id, subscriber) = (entry.key(), entry.value());
            for payload in batch {
                if !subscriber.wants(payload) {
                    continue;
                }
                if !self.deliver(subscriber, payload.clone()) {
                    closed.push(*id);
                    break;
                }
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
    }

    /// Attempt one delivery. Returns false when the subscriber is gone.
    fn deliver(&self, subscriber: &Subscriber, payload: EventPayload) -> bool {
        // A flagged subscriber gets a single Resync instead of the regular
        // stream; everything else stays dropped until it lands.
        if subscriber.needs_resync.load(Ordering::Relaxed) {
            match subscriber.tx.try_send(subscriber.stamp(EventPayload::Resync)) {
                Ok(()) => {
                    subscriber.needs_resync.store(false, Ordering::Relaxed);
                    debug!(client = %subscriber.client_id, "resync signal delivered");
                }
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
            return true;
        }

        match subscriber.tx.try_send(subscriber.stamp(payload)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                subscriber.needs_resync.store(true, Ordering::Relaxed);
                let overflow = EngineError::subscriber_overflow(
                    subscriber.client_id.clone(),
                    self.buffer_capacity,
                );
                warn!(error = %overflow, "subscriber fell behind; switching to resync");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updated(id: &str, kind: ArtifactKind) -> EventPayload {
        EventPayload::ArtifactUpdated {
            artifact_id: id.into(),
            kind,
            revision: Revision(1),
            provenance: ProvenanceVector::new(),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_with_monotonic_sequence() {
        let gateway = Gateway::new(8);
        let mut subscription = gateway.subscribe("piping", &[]);

        gateway.publish(&[updated("stressCalc", ArtifactKind::Calculation)]);
        gateway.publish(&[updated("isoDrawing", ArtifactKind::Drawing)]);

        let first = subscription.receiver.recv().await.unwrap();
        let second = subscription.receiver.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(matches!(second.payload, EventPayload::ArtifactUpdated { ref artifact_id, .. }
            if artifact_id.as_str() == "isoDrawing"));
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let gateway = Gateway::new(8);
        let mut drawings_only = gateway.subscribe("drafting", &[ArtifactKind::Drawing]);

        gateway.publish(&[
            updated("stressCalc", ArtifactKind::Calculation),
            updated("isoDrawing", ArtifactKind::Drawing),
        ]);

        let event = drawings_only.receiver.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::ArtifactUpdated { ref artifact_id, .. }
            if artifact_id.as_str() == "isoDrawing"));
        assert!(drawings_only.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overflow_collapses_to_resync() {
        let gateway = Gateway::new(1);
        let mut slow = gateway.subscribe("simulator", &[]);

        // First event fills the buffer; the second overflows and flags the
        // subscriber instead of queueing without bound.
        gateway.publish(&[updated("a", ArtifactKind::Report)]);
        gateway.publish(&[updated("b", ArtifactKind::Report)]);

        let first = slow.receiver.recv().await.unwrap();
        assert!(matches!(first.payload, EventPayload::ArtifactUpdated { .. }));

        // Buffer has space again: the next publish delivers the pending
        // resync signal, not the regular event.
        gateway.publish(&[updated("c", ArtifactKind::Report)]);
        let second = slow.receiver.recv().await.unwrap();
        assert_eq!(second.payload, EventPayload::Resync);
        // The dropped event consumed sequence 2: the gap plus the resync
        // tells the client exactly what it missed.
        assert_eq!(second.sequence, 3);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_removed() {
        let gateway = Gateway::new(4);
        let subscription = gateway.subscribe("drafting", &[]);
        assert_eq!(gateway.subscriber_count(), 1);

        drop(subscription);
        gateway.publish(&[updated("a", ArtifactKind::Drawing)]);
        assert_eq!(gateway.subscriber_count(), 0);
    }
}
