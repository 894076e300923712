//! # Typed Event Dispatch
//!
//! This module provides the event surface of the simulation core: a small
//! synchronous publish/subscribe bus plus the closed event sets emitted by
//! the connector aggregate and the scenario executor. Subscribers receive
//! events in subscription order; a panicking subscriber is isolated and
//! logged so one bad listener cannot break the others.

use crate::executor::ExecutionContext;
use chargesim_types::{AvailabilityType, ChargePointStatus, ConnectorId, TransactionId};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::warn;

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Synchronous pub/sub bus for a closed event set.
///
/// Cloning is cheap and shares the subscriber list.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

struct BusInner<E> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, Callback<E>)>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    /// Create a new bus with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a subscriber; the returned handle unsubscribes it
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = match self.inner.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push((id, Box::new(callback)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Dispatch an event synchronously to all current subscribers
    pub fn emit(&self, event: &E) {
        let subscribers = match self.inner.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (id, callback) in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!("event subscriber {} panicked, skipping", id);
            }
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
pub struct Subscription<E> {
    id: u64,
    bus: Weak<BusInner<E>>,
}

impl<E> Subscription<E> {
    /// Remove the subscriber from the bus
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut subscribers = match inner.subscribers.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Change notifications emitted by the connector aggregate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum ConnectorEvent {
    /// Connector status transition
    StatusChanged {
        connector_id: ConnectorId,
        from: ChargePointStatus,
        to: ChargePointStatus,
    },

    /// Availability changed via local or remote action
    AvailabilityChanged {
        connector_id: ConnectorId,
        availability: AvailabilityType,
    },

    /// Energy meter register updated
    MeterValueChanged {
        connector_id: ConnectorId,
        value_wh: i64,
    },

    /// Simulated battery state of charge updated
    SocChanged {
        connector_id: ConnectorId,
        soc_percent: Option<f64>,
    },

    /// Transaction began locally (id still unconfirmed)
    TransactionStarted {
        connector_id: ConnectorId,
        id_tag: String,
    },

    /// Central system confirmed the transaction id
    TransactionIdAssigned {
        connector_id: ConnectorId,
        transaction_id: TransactionId,
    },

    /// Transaction ended
    TransactionStopped { connector_id: ConnectorId },

    /// Auto meter value configuration toggled
    AutoMeterChanged {
        connector_id: ConnectorId,
        enabled: bool,
    },
}

/// Observability events emitted by a scenario executor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum ExecutorEvent {
    /// Execution context changed state
    StateChanged {
        scenario_id: String,
        context: ExecutionContext,
    },

    /// A node started executing
    NodeExecuted {
        scenario_id: String,
        node_id: String,
    },

    /// A node's handler returned
    NodeCompleted {
        scenario_id: String,
        node_id: String,
    },

    /// Countdown progress for a delay or trigger node; zero remaining
    /// clears the countdown on the observer side
    NodeProgress {
        scenario_id: String,
        node_id: String,
        remaining_seconds: f64,
        total_seconds: f64,
    },

    /// The flow aborted with an error
    FlowError {
        scenario_id: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_event(connector_id: u32, value_wh: i64) -> ConnectorEvent {
        ConnectorEvent::MeterValueChanged {
            connector_id: ConnectorId::new(connector_id).unwrap(),
            value_wh,
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus: EventBus<ConnectorEvent> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = bus.subscribe(move |event| {
            if let ConnectorEvent::MeterValueChanged { value_wh, .. } = event {
                seen_clone.lock().unwrap().push(*value_wh);
            }
        });

        bus.emit(&test_event(1, 100));
        bus.emit(&test_event(1, 200));

        assert_eq!(*seen.lock().unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus: EventBus<ConnectorEvent> = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let seen_clone = seen.clone();
        let sub = bus.subscribe(move |_| {
            *seen_clone.lock().unwrap() += 1;
        });

        bus.emit(&test_event(1, 1));
        sub.unsubscribe();
        bus.emit(&test_event(1, 2));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus: EventBus<ConnectorEvent> = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let _bad = bus.subscribe(|_| panic!("bad listener"));
        let seen_clone = seen.clone();
        let _good = bus.subscribe(move |_| {
            *seen_clone.lock().unwrap() += 1;
        });

        bus.emit(&test_event(1, 1));

        // The panicking subscriber must not prevent later subscribers from
        // seeing the event.
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
