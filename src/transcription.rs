use crate::consts::EVENT_CHANNEL_CAPACITY;
use crate::types::{ListenControl, ListenEvent};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
#[cfg(test)]
use mockall::automock;
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

mod utterance;

pub use utterance::UtteranceBuffer;

/// A piece of recognized text.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptFragment {
    pub text: String,
    /// The recognizer committed this segment.
    pub is_final: bool,
    /// The recognizer judges the utterance complete.
    pub is_speech_final: bool,
}

impl TranscriptFragment {
    pub fn interim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: false,
            is_speech_final: false,
        }
    }

    pub fn finalized(text: &str, is_speech_final: bool) -> Self {
        Self {
            text: text.to_string(),
            is_final: true,
            is_speech_final,
        }
    }
}

/// Events the recognizer connection reports to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    Fragment(TranscriptFragment),
    /// Prolonged silence after finalized fragments.
    UtteranceEnd,
    Closed,
}

/// The session's view of a streaming recognizer.
#[cfg_attr(test, automock)]
pub trait Transcriber: Send + Sync {
    /// Forwards inbound audio. Never blocks; audio is dropped when the connection is gone.
    fn feed(&self, audio: Vec<u8>);

    fn keep_alive(&self);

    fn close(&self);
}

enum Outgoing {
    Audio(Vec<u8>),
    Control(ListenControl),
}

/// Streaming speech-to-text over a `listen` websocket.
pub struct TranscriptionAdapter {
    tx: mpsc::UnboundedSender<Outgoing>,
    dropping: AtomicBool,
}

impl TranscriptionAdapter {
    /// Opens the recognizer connection. `url` already carries the recognizer options.
    pub async fn connect(
        url: &str,
        api_key: &SecretString,
    ) -> Result<(Self, mpsc::Receiver<TranscriptEvent>)> {
        let request = crate::utils::build_request(url, api_key)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("Failed to connect to the recognizer")?;
        tracing::info!("recognizer connected");

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                let (message, closing) = match outgoing {
                    Outgoing::Audio(audio) => (Message::Binary(audio), false),
                    Outgoing::Control(control) => match serde_json::to_string(&control) {
                        Ok(text) => (Message::Text(text), control == ListenControl::CloseStream),
                        Err(e) => {
                            tracing::error!("failed to serialize recognizer control: {}", e);
                            continue;
                        }
                    },
                };
                if let Err(e) = write.send(message).await {
                    tracing::error!("failed to send to recognizer: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("recognizer close: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("recognizer error: {}", e);
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<ListenEvent>(&text) {
                        Ok(event) => {
                            if let Some(event) = translate(event) {
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!("failed to deserialize recognizer message: {}, text=> {:?}", e, text);
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message from recognizer: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("recognizer disconnected: {:?}", reason);
                        break;
                    }
                    _ => {}
                }
            }
            let _ = event_tx.send(TranscriptEvent::Closed).await;
        });

        Ok((
            Self {
                tx,
                dropping: AtomicBool::new(false),
            },
            event_rx,
        ))
    }

    fn send(&self, outgoing: Outgoing) {
        if self.tx.send(outgoing).is_err() && !self.dropping.swap(true, Ordering::Relaxed) {
            tracing::warn!("recognizer connection is not open, dropping audio");
        }
    }
}

impl Transcriber for TranscriptionAdapter {
    fn feed(&self, audio: Vec<u8>) {
        self.send(Outgoing::Audio(audio));
    }

    fn keep_alive(&self) {
        tracing::trace!("recognizer keep-alive");
        self.send(Outgoing::Control(ListenControl::KeepAlive));
    }

    fn close(&self) {
        let _ = self.tx.send(Outgoing::Control(ListenControl::CloseStream));
    }
}

impl Drop for TranscriptionAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Maps a recognizer message to a session event. Empty transcripts and metadata yield nothing.
fn translate(event: ListenEvent) -> Option<TranscriptEvent> {
    match event {
        ListenEvent::Results(results) => {
            let text = results.transcript();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptEvent::Fragment(TranscriptFragment {
                text: text.to_string(),
                is_final: results.is_final(),
                is_speech_final: results.speech_final(),
            }))
        }
        ListenEvent::UtteranceEnd(_) => Some(TranscriptEvent::UtteranceEnd),
        ListenEvent::SpeechStarted(_) => {
            tracing::debug!("recognizer: speech started");
            None
        }
        ListenEvent::Metadata(metadata) => {
            tracing::debug!("recognizer metadata: request_id={:?}", metadata.request_id());
            None
        }
        ListenEvent::Unknown => None,
    }
}
