use crate::consts::EVENT_CHANNEL_CAPACITY;
use crate::types::{SpeakCommand, SpeakEvent};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
#[cfg(test)]
use mockall::automock;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Events the synthesizer connection reports to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    /// A chunk of synthesized audio, in the wire format expected by the telephony peer.
    Audio(Vec<u8>),
    Flushed,
    Cleared,
    Closed,
}

/// The session's view of a streaming synthesizer. Commands reach the service in call order.
#[cfg_attr(test, automock)]
pub trait Synthesizer: Send + Sync {
    fn speak(&self, text: &str);

    fn flush(&self);

    /// Drops queued text and pending audio. Safe to call when nothing is in flight.
    fn clear(&self);

    fn close(&self);
}

/// Streaming text-to-speech over a `speak` websocket.
pub struct SynthesisAdapter {
    tx: mpsc::UnboundedSender<SpeakCommand>,
}

impl SynthesisAdapter {
    pub async fn connect(
        url: &str,
        api_key: &SecretString,
    ) -> Result<(Self, mpsc::Receiver<SpeechEvent>)> {
        let request = crate::utils::build_request(url, api_key)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("Failed to connect to the synthesizer")?;
        tracing::info!("synthesizer connected");

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<SpeakCommand>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let closing = command == SpeakCommand::Close;
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to serialize speak command: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("failed to send to synthesizer: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("synthesizer close: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("synthesizer error: {}", e);
                        break;
                    }
                    Ok(message) => message,
                };
                let event = match message {
                    Message::Binary(audio) => Some(SpeechEvent::Audio(audio)),
                    Message::Text(text) => match serde_json::from_str::<SpeakEvent>(&text) {
                        Ok(event) => translate(event),
                        Err(e) => {
                            tracing::warn!("failed to deserialize synthesizer message: {}, text=> {:?}", e, text);
                            None
                        }
                    },
                    Message::Close(reason) => {
                        tracing::info!("synthesizer disconnected: {:?}", reason);
                        break;
                    }
                    _ => None,
                };
                if let Some(event) = event {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            let _ = event_tx.send(SpeechEvent::Closed).await;
        });

        Ok((Self { tx }, event_rx))
    }

    fn send(&self, command: SpeakCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::warn!("synthesizer connection is not open, dropping {:?}", e.0);
        }
    }
}

impl Synthesizer for SynthesisAdapter {
    fn speak(&self, text: &str) {
        self.send(SpeakCommand::speak(text));
    }

    fn flush(&self) {
        self.send(SpeakCommand::Flush);
    }

    fn clear(&self) {
        self.send(SpeakCommand::Clear);
    }

    fn close(&self) {
        let _ = self.tx.send(SpeakCommand::Close);
    }
}

impl Drop for SynthesisAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

fn translate(event: SpeakEvent) -> Option<SpeechEvent> {
    match event {
        SpeakEvent::Flushed { .. } => Some(SpeechEvent::Flushed),
        SpeakEvent::Cleared { .. } => Some(SpeechEvent::Cleared),
        SpeakEvent::Metadata { request_id, model_name } => {
            tracing::debug!("synthesizer metadata: request_id={:?} model={:?}", request_id, model_name);
            None
        }
        SpeakEvent::Warning { description, code } => {
            tracing::warn!("synthesizer warning {:?}: {:?}", code, description);
            None
        }
        SpeakEvent::Error { description, code } => {
            tracing::error!("synthesizer error {:?}: {:?}", code, description);
            None
        }
        SpeakEvent::Unknown => None,
    }
}
