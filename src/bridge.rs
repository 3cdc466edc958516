use crate::audio;
use crate::consts::EVENT_CHANNEL_CAPACITY;
use crate::types::{MediaEvent, OutboundMessage};
use futures::{Sink, SinkExt, Stream, StreamExt};
#[cfg(test)]
use mockall::automock;
use std::fmt::Display;
use tokio::sync::mpsc;

/// Outbound half of the telephony media stream, as seen by the session.
///
/// Messages reach the peer in submission order. Sending never waits on the socket.
#[cfg_attr(test, automock)]
pub trait AudioBridge: Send + Sync {
    fn send_media(&self, stream_sid: &str, audio: &[u8]);

    /// Asks the peer to drop any audio it has buffered for playback.
    fn send_clear(&self, stream_sid: &str);
}

/// Media-stream bridge over an accepted websocket, reduced to text frames.
pub struct MediaStreamBridge {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl MediaStreamBridge {
    /// Spawns the reader and writer tasks for one peer connection.
    ///
    /// The returned receiver yields parsed inbound events and ends when the peer goes away
    /// or after a terminal event.
    pub fn attach<S, R>(mut sink: S, mut stream: R) -> (Self, mpsc::Receiver<MediaEvent>)
    where
        S: Sink<String> + Send + Unpin + 'static,
        S::Error: Display,
        R: Stream<Item = String> + Send + Unpin + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to serialize outbound message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(text).await {
                    tracing::warn!("failed to send to telephony peer: {}", e);
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                tracing::debug!("telephony peer close: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(text) = stream.next().await {
                let Some(event) = parse_event(&text) else {
                    continue;
                };
                let terminal = event.is_terminal();
                if event_tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
            tracing::debug!("media stream reader finished");
        });

        (Self { tx }, event_rx)
    }

    fn send(&self, message: OutboundMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("telephony peer is gone, dropping outbound message");
        }
    }
}

impl AudioBridge for MediaStreamBridge {
    fn send_media(&self, stream_sid: &str, audio: &[u8]) {
        self.send(OutboundMessage::media(stream_sid, audio::encode(audio)));
    }

    fn send_clear(&self, stream_sid: &str) {
        self.send(OutboundMessage::clear(stream_sid));
    }
}

/// Parses one inbound text frame. Malformed or unknown events are logged and dropped.
pub fn parse_event(text: &str) -> Option<MediaEvent> {
    match serde_json::from_str::<MediaEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("failed to deserialize media event: {}, text=> {:?}", e, text);
            None
        }
    }
}
