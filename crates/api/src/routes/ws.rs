//! Websocket endpoint streaming live stock events.
//!
//! On connect the client is registered with the hub and then receives a
//! point-in-time snapshot (`stock_update`, `notifications`, `system_status`)
//! followed by every event broadcast after registration.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use common::Actor;
use futures_util::{SinkExt, StreamExt, future};
use hub::{ClientSession, Frame, FrameSink, FrameStream, HubError, WireEvent};
use ledger::{LedgerStore, NotificationStore};

use super::notifications::UNREAD_LIMIT;
use crate::extract::RequestActor;
use crate::{AppState, AppStore};

/// Bound on queueing each snapshot message.
const SNAPSHOT_SEND_WAIT: Duration = Duration::from_secs(1);

/// GET /ws: upgrade to a websocket session.
pub async fn connect<S: AppStore>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
    RequestActor(actor): RequestActor,
) -> impl IntoResponse {
    metrics::counter!("websocket_upgrades_total").increment(1);
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = split_socket(socket);
        match attach(&state, actor, sink, stream).await {
            Ok(session) => {
                let id = session.id();
                let final_state = session.closed().await;
                tracing::debug!(session_id = %id, state = %final_state, "websocket finished");
            }
            Err(err) => {
                tracing::warn!(actor_id = %actor.id, error = %err, "websocket refused");
            }
        }
    })
}

/// Starts a session over the given transport and queues the snapshot for it.
///
/// The snapshot is queued after registration, through the same hub loop as
/// broadcasts, so no event committed after the snapshot was read can be
/// missed by the client.
pub async fn attach<S: AppStore>(
    state: &AppState<S>,
    actor: Actor,
    sink: FrameSink,
    stream: FrameStream,
) -> hub::Result<ClientSession> {
    let session =
        ClientSession::start(&state.hub, actor, sink, stream, state.session_config).await?;

    for event in snapshot(state, actor).await {
        let sent =
            tokio::time::timeout(SNAPSHOT_SEND_WAIT, state.hub.send_to(session.id(), &event))
                .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(session_id = %session.id(), kind = event.event_type(), error = %err, "snapshot not sent");
            }
            Err(_) => {
                tracing::warn!(session_id = %session.id(), kind = event.event_type(), "snapshot send timed out");
            }
        }
    }

    Ok(session)
}

/// Builds the snapshot for a newly connected actor. Empty low-stock and
/// notification lists are left out; a failed read skips that part.
pub async fn snapshot<S: AppStore>(state: &AppState<S>, actor: Actor) -> Vec<WireEvent> {
    let mut events = Vec::with_capacity(3);

    match state.store().low_stock_products().await {
        Ok(products) if !products.is_empty() => events.push(WireEvent::stock_update(&products)),
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "low stock snapshot unavailable"),
    }

    match state
        .store()
        .unread_notifications(actor.id, UNREAD_LIMIT)
        .await
    {
        Ok(unread) if !unread.is_empty() => events.push(WireEvent::notifications(&unread)),
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "notification snapshot unavailable"),
    }

    match state.store().stock_summary().await {
        Ok(summary) => events.push(WireEvent::system_status(
            summary,
            state.hub.stats().connected,
        )),
        Err(err) => tracing::warn!(error = %err, "system status unavailable"),
    }

    events
}

/// Adapts an axum websocket to the session's frame transport.
fn split_socket(socket: WebSocket) -> (FrameSink, FrameStream) {
    let (sender, receiver) = socket.split();

    let sink = sender
        .with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))))
        .sink_map_err(|err| HubError::Transport(err.to_string()));
    let stream = receiver.map(|message| {
        message
            .map(from_message)
            .map_err(|err| HubError::Transport(err.to_string()))
    });

    (Box::pin(sink), Box::pin(stream))
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Text(String::from_utf8_lossy(&data).into_owned()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_map_to_messages() {
        assert!(matches!(
            into_message(Frame::Text("hi".to_string())),
            Message::Text(text) if text.as_str() == "hi"
        ));
        assert!(matches!(
            into_message(Frame::Ping(vec![1])),
            Message::Ping(data) if data[..] == [1u8]
        ));
        assert!(matches!(into_message(Frame::Close), Message::Close(None)));
    }

    #[test]
    fn test_messages_map_to_frames() {
        assert_eq!(
            from_message(Message::Pong(vec![2].into())),
            Frame::Pong(vec![2])
        );
        assert_eq!(
            from_message(Message::Text("ok".to_string().into())),
            Frame::Text("ok".to_string())
        );
        assert_eq!(from_message(Message::Close(None)), Frame::Close);
    }
}
