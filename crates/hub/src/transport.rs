//! Frame-level transport seam between client sessions and the network.
//!
//! Sessions read and write [`Frame`]s through a boxed sink and stream, so the
//! same session code runs over an axum websocket or an in-process channel.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::{Sink, sink, stream};
use tokio::sync::mpsc;

use crate::{HubError, Result};

/// A transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Outgoing half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = HubError> + Send>>;

/// Incoming half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// The remote end of an in-process connection.
pub struct ChannelPeer {
    /// Frames the session wrote.
    pub received: mpsc::Receiver<Frame>,
    /// Frames to deliver to the session's reader.
    pub sender: mpsc::Sender<Frame>,
}

impl ChannelPeer {
    /// Receives the next text frame, skipping pings.
    pub async fn next_text(&mut self) -> Option<String> {
        while let Some(frame) = self.received.recv().await {
            match frame {
                Frame::Text(text) => return Some(text),
                Frame::Close => return None,
                Frame::Ping(_) | Frame::Pong(_) => continue,
            }
        }
        None
    }
}

/// Creates an in-process connection: the sink and stream for a session, and
/// the peer that plays the client.
pub fn channel_transport(capacity: usize) -> (FrameSink, FrameStream, ChannelPeer) {
    let (to_peer, received) = mpsc::channel(capacity);
    let (sender, from_peer) = mpsc::channel(capacity);

    let sink = sink::unfold(to_peer, |to_peer: mpsc::Sender<Frame>, frame: Frame| async move {
        to_peer
            .send(frame)
            .await
            .map_err(|_| HubError::Transport("peer disconnected".to_string()))?;
        Ok::<_, HubError>(to_peer)
    });

    let stream = stream::unfold(from_peer, |mut from_peer| async move {
        from_peer.recv().await.map(|frame| (Ok(frame), from_peer))
    });

    (
        Box::pin(sink),
        Box::pin(stream),
        ChannelPeer { received, sender },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn frames_cross_the_channel_both_ways() {
        let (mut sink, mut stream, mut peer) = channel_transport(4);

        sink.send(Frame::Text("hello".to_string())).await.unwrap();
        assert_eq!(peer.next_text().await.as_deref(), Some("hello"));

        peer.sender.send(Frame::Pong(Vec::new())).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Frame::Pong(Vec::new()));

        drop(peer);
        assert!(stream.next().await.is_none());
        assert!(sink.send(Frame::Close).await.is_err());
    }
}
