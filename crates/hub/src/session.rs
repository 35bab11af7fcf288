//! Client sessions.
//!
//! A session bridges one transport connection and the hub. It runs two loops:
//!
//! - the writer drains the session's outbound queue onto the transport and
//!   sends keepalive pings,
//! - the reader consumes control frames and enforces the idle deadline.
//!
//! Whichever loop stops first unregisters the session and tells the other to
//! stop. The session reaches [`SessionState::Closed`] only after both loops
//! have returned and the hub has processed the unregistration.

use std::time::Duration;

use common::{Actor, SessionId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::hub::{HubHandle, Payload};
use crate::transport::{Frame, FrameSink, FrameStream};
use crate::{HubError, Result};

/// Session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
    /// How often the writer sends a ping.
    pub ping_interval: Duration,
    /// How long the reader waits for any frame before giving up.
    pub pong_wait: Duration,
    /// Bound on writing a single frame.
    pub write_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of a session.
///
/// ```text
/// Connecting ──► Registered ──► Unregistering ──► Closed
///      │                                            ▲
///      └────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Connecting,
    Registered,
    Unregistering,
    Closed,
}

impl SessionState {
    /// Returns true if events can be delivered in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Registered)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connecting, SessionState::Registered)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Registered, SessionState::Unregistering)
                | (SessionState::Unregistering, SessionState::Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Registered => "registered",
            SessionState::Unregistering => "unregistering",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The hub closed the outbound queue.
    QueueClosed,
    WriteFailed,
    WriteTimedOut,
    /// The client sent a close frame or ended the stream.
    PeerClosed,
    ReadFailed,
    /// Nothing arrived within the idle deadline.
    IdleTimeout,
    /// The other loop stopped first.
    Stopped,
}

impl LoopExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopExit::QueueClosed => "queue_closed",
            LoopExit::WriteFailed => "write_failed",
            LoopExit::WriteTimedOut => "write_timed_out",
            LoopExit::PeerClosed => "peer_closed",
            LoopExit::ReadFailed => "read_failed",
            LoopExit::IdleTimeout => "idle_timeout",
            LoopExit::Stopped => "stopped",
        }
    }
}

/// Handle to a running session.
pub struct ClientSession {
    id: SessionId,
    actor: Actor,
    state: watch::Receiver<SessionState>,
    hub: HubHandle,
    task: JoinHandle<()>,
}

impl ClientSession {
    /// Registers a new session with the hub and starts its loops.
    ///
    /// Fails with [`HubError::HubClosed`] if the hub has stopped; the
    /// transport is dropped in that case.
    #[tracing::instrument(skip_all, fields(actor_id = %actor.id))]
    pub async fn start(
        hub: &HubHandle,
        actor: Actor,
        sink: FrameSink,
        stream: FrameStream,
        config: SessionConfig,
    ) -> Result<Self> {
        let id = SessionId::new();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        if let Err(err) = hub.register(id, actor, outbound_tx).await {
            transition(&state_tx, SessionState::Closed);
            return Err(err);
        }
        transition(&state_tx, SessionState::Registered);
        tracing::info!(session_id = %id, "session started");

        let task = tokio::spawn(run_session(
            id,
            hub.clone(),
            sink,
            stream,
            outbound_rx,
            state_tx,
            config,
        ));

        Ok(Self {
            id,
            actor,
            state: state_rx,
            hub: hub.clone(),
            task,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Asks the hub to drop this session; the loops then wind down.
    pub fn close(&self) {
        self.hub.unregister(self.id);
    }

    /// Waits until the session is fully closed.
    pub async fn closed(mut self) -> SessionState {
        let _ = self.state.wait_for(|state| state.is_terminal()).await;
        let _ = (&mut self.task).await;
        *self.state.borrow()
    }
}

fn transition(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            false
        }
    });
}

async fn run_session(
    id: SessionId,
    hub: HubHandle,
    sink: FrameSink,
    stream: FrameStream,
    outbound: mpsc::Receiver<Payload>,
    state: watch::Sender<SessionState>,
    config: SessionConfig,
) {
    let (stop_tx, stop_rx) = watch::channel(false);

    let on_exit = |exit: LoopExit, side: &'static str| {
        tracing::debug!(session_id = %id, side, reason = exit.as_str(), "session loop stopped");
        stop_tx.send_replace(true);
        transition(&state, SessionState::Unregistering);
        hub.unregister(id);
    };

    let writer = async {
        let exit = write_loop(sink, outbound, stop_rx.clone(), config).await;
        on_exit(exit, "writer");
        exit
    };
    let reader = async {
        let exit = read_loop(stream, stop_rx.clone(), config).await;
        on_exit(exit, "reader");
        exit
    };
    let (writer_exit, reader_exit) = tokio::join!(writer, reader);

    hub.unregister_and_wait(id).await;
    transition(&state, SessionState::Closed);
    tracing::info!(
        session_id = %id,
        writer = writer_exit.as_str(),
        reader = reader_exit.as_str(),
        "session closed"
    );
}

async fn write_frame(sink: &mut FrameSink, frame: Frame, wait: Duration) -> Result<()> {
    tokio::time::timeout(wait, sink.send(frame))
        .await
        .map_err(|_| HubError::WriteTimeout)?
}

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<Payload>,
    mut stop: watch::Receiver<bool>,
    config: SessionConfig,
) -> LoopExit {
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        let frame = tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => Frame::Text(payload.to_string()),
                None => break LoopExit::QueueClosed,
            },
            _ = ping.tick() => Frame::Ping(Vec::new()),
            _ = stop.changed() => break LoopExit::Stopped,
        };

        match write_frame(&mut sink, frame, config.write_wait).await {
            Ok(()) => {}
            Err(HubError::WriteTimeout) => return LoopExit::WriteTimedOut,
            Err(_) => return LoopExit::WriteFailed,
        }
    };

    // Best effort; the peer may already be gone.
    let _ = write_frame(&mut sink, Frame::Close, config.write_wait).await;
    exit
}

async fn read_loop(
    mut stream: FrameStream,
    mut stop: watch::Receiver<bool>,
    config: SessionConfig,
) -> LoopExit {
    loop {
        tokio::select! {
            next = tokio::time::timeout(config.pong_wait, stream.next()) => match next {
                Err(_) => return LoopExit::IdleTimeout,
                Ok(None) | Ok(Some(Ok(Frame::Close))) => return LoopExit::PeerClosed,
                Ok(Some(Err(_))) => return LoopExit::ReadFailed,
                // Any frame counts as liveness. Clients only send control frames.
                Ok(Some(Ok(_))) => continue,
            },
            _ = stop.changed() => return LoopExit::Stopped,
        }
    }
}
