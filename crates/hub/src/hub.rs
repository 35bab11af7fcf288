//! The broadcast hub.
//!
//! One task owns the registry of connected sessions. Everything else talks to
//! it through a [`HubHandle`], which only sends messages into the hub's input
//! queues:
//!
//! - register: add a session and its outbound queue
//! - unregister: remove a session, closing its outbound queue (idempotent)
//! - deliver: fan an encoded event out to every session, or to one
//!
//! Fan-out never blocks. If a session's outbound queue is full the event is
//! dropped for that session only and counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use common::{Actor, SessionId};
use domain::{StockChanged, StockEventSink};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{HubError, Result, WireEvent};

/// An encoded event, shared between every session it is delivered to.
pub type Payload = Arc<str>;

/// Hub settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the register and delivery input queues.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Sessions currently registered.
    pub connected: usize,
    /// Sessions registered since start.
    pub registered: u64,
    /// Events fanned out to all sessions.
    pub broadcast: u64,
    /// Per-session enqueues that succeeded.
    pub delivered: u64,
    /// Per-session enqueues dropped because the session's queue was full,
    /// plus events refused because the hub's own queue was full.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connected: AtomicUsize,
    registered: AtomicU64,
    broadcast: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> HubStats {
        HubStats {
            connected: self.connected.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            broadcast: self.broadcast.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Registration {
    session_id: SessionId,
    actor: Actor,
    outbound: mpsc::Sender<Payload>,
    ack: oneshot::Sender<()>,
}

struct Unregistration {
    session_id: SessionId,
    ack: Option<oneshot::Sender<()>>,
}

enum Target {
    All,
    Session(SessionId),
}

struct Delivery {
    target: Target,
    payload: Payload,
}

struct Registered {
    actor: Actor,
    outbound: mpsc::Sender<Payload>,
}

/// The hub loop. Created and started with [`Hub::spawn`].
pub struct Hub {
    sessions: HashMap<SessionId, Registered>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<Unregistration>,
    delivery_rx: mpsc::Receiver<Delivery>,
    shutdown_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
}

impl Hub {
    /// Starts the hub loop and returns a handle to it.
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let capacity = config.queue_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let hub = Hub {
            sessions: HashMap::new(),
            register_rx,
            unregister_rx,
            delivery_rx,
            shutdown_rx,
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(hub.run());

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            delivery_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            counters,
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!("hub started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break,
                Some(unregistration) = self.unregister_rx.recv() => {
                    self.unregister(unregistration);
                }
                Some(registration) = self.register_rx.recv() => {
                    self.register(registration);
                }
                Some(delivery) = self.delivery_rx.recv() => {
                    self.deliver(delivery);
                }
                else => break,
            }
        }
        self.close_all();
        tracing::info!("hub stopped");
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            session_id,
            actor,
            outbound,
            ack,
        } = registration;

        self.sessions
            .insert(session_id, Registered { actor, outbound });
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hub_sessions_registered_total").increment(1);
        self.publish_connected();
        tracing::debug!(
            session_id = %session_id,
            actor_id = %actor.id,
            role = %actor.role,
            "session registered"
        );

        // The caller may have given up waiting; the session stays registered
        // until it unregisters or its queue is found closed.
        let _ = ack.send(());
    }

    fn unregister(&mut self, unregistration: Unregistration) {
        if let Some(session) = self.sessions.remove(&unregistration.session_id) {
            self.publish_connected();
            tracing::debug!(
                session_id = %unregistration.session_id,
                actor_id = %session.actor.id,
                "session unregistered"
            );
        }
        if let Some(ack) = unregistration.ack {
            let _ = ack.send(());
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        let mut closed = Vec::new();
        match delivery.target {
            Target::All => {
                self.counters.broadcast.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("hub_events_broadcast_total").increment(1);
                for (session_id, session) in &self.sessions {
                    if !self.enqueue(*session_id, session, &delivery.payload) {
                        closed.push(*session_id);
                    }
                }
            }
            Target::Session(session_id) => {
                if let Some(session) = self.sessions.get(&session_id)
                    && !self.enqueue(session_id, session, &delivery.payload)
                {
                    closed.push(session_id);
                }
            }
        }

        for session_id in closed {
            self.unregister(Unregistration {
                session_id,
                ack: None,
            });
        }
    }

    /// Offers the payload to one session. Returns false if the session's
    /// queue is closed.
    fn enqueue(&self, session_id: SessionId, session: &Registered, payload: &Payload) -> bool {
        match session.outbound.try_send(Arc::clone(payload)) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("hub_events_dropped_total", "stage" => "session").increment(1);
                tracing::debug!(session_id = %session_id, "outbound queue full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn publish_connected(&self) {
        let connected = self.sessions.len();
        self.counters.connected.store(connected, Ordering::Relaxed);
        metrics::gauge!("hub_sessions_connected").set(connected as f64);
    }

    /// Drops every outbound queue, which tells each session to close.
    fn close_all(&mut self) {
        let count = self.sessions.len();
        self.sessions.clear();
        self.publish_connected();
        if count > 0 {
            tracing::info!(sessions = count, "closed all sessions");
        }
    }
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<Unregistration>,
    delivery_tx: mpsc::Sender<Delivery>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    counters: Arc<Counters>,
}

impl HubHandle {
    /// Registers a session. Returns once the hub has added it, so every
    /// event broadcast after this call reaches the session.
    pub async fn register(
        &self,
        session_id: SessionId,
        actor: Actor,
        outbound: mpsc::Sender<Payload>,
    ) -> Result<()> {
        let (ack, acked) = oneshot::channel();
        self.register_tx
            .send(Registration {
                session_id,
                actor,
                outbound,
                ack,
            })
            .await
            .map_err(|_| HubError::HubClosed)?;
        acked.await.map_err(|_| HubError::HubClosed)
    }

    /// Asks the hub to remove a session. Unregistering an unknown or already
    /// removed session is a no-op.
    pub fn unregister(&self, session_id: SessionId) {
        let _ = self.unregister_tx.send(Unregistration {
            session_id,
            ack: None,
        });
    }

    /// Removes a session and waits until the hub has processed the removal.
    /// Returns immediately if the hub has stopped.
    pub async fn unregister_and_wait(&self, session_id: SessionId) {
        let (ack, acked) = oneshot::channel();
        if self
            .unregister_tx
            .send(Unregistration {
                session_id,
                ack: Some(ack),
            })
            .is_ok()
        {
            let _ = acked.await;
        }
    }

    /// Offers an event for fan-out to every registered session without
    /// waiting. Fails with [`HubError::QueueFull`] if the hub is saturated.
    pub fn broadcast(&self, event: &WireEvent) -> Result<()> {
        let payload: Payload = event.to_json()?.into();
        self.offer(Target::All, payload)
    }

    /// Queues an event for one session, waiting for room in the hub's
    /// queue. Events for unknown sessions are discarded by the hub.
    pub async fn send_to(&self, session_id: SessionId, event: &WireEvent) -> Result<()> {
        let payload: Payload = event.to_json()?.into();
        self.delivery_tx
            .send(Delivery {
                target: Target::Session(session_id),
                payload,
            })
            .await
            .map_err(|_| HubError::HubClosed)
    }

    fn offer(&self, target: Target, payload: Payload) -> Result<()> {
        match self.delivery_tx.try_send(Delivery { target, payload }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("hub_events_dropped_total", "stage" => "hub").increment(1);
                Err(HubError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::HubClosed),
        }
    }

    /// Stops the hub loop. Every session's outbound queue is closed.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.delivery_tx.is_closed()
    }

    pub fn stats(&self) -> HubStats {
        self.counters.snapshot()
    }
}

impl StockEventSink for HubHandle {
    fn publish(&self, event: &StockChanged) {
        if let Err(err) = self.broadcast(&WireEvent::stock_change(event)) {
            tracing::warn!(
                product_id = %event.product_id,
                error = %err,
                "stock change not broadcast"
            );
        }
    }
}
