//! Streaming text generation.
//!
//! A [`Generator`] turns a conversation into a lazy stream of text increments.
//! [`GenerationOrchestrator`] owns the active turn of a session and forwards
//! increments to the synthesizer.

use crate::types::{ChatMessage, ChatRequest};
use anyhow::{Context, Result};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};

mod decoder;
mod timings;
mod turn;

pub use decoder::ChunkDecoder;
pub use timings::TurnTimings;
pub use turn::{GenerationOrchestrator, TurnProgress, TurnState};

/// Ordered text increments of one response. Nothing is requested until the stream is polled.
pub type Increments = BoxStream<'static, Result<String>>;

pub trait Generator: Send + Sync {
    fn stream(&self, messages: Vec<ChatMessage>) -> Increments;
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &SecretString, model: &str) -> Self {
        Self {
            http,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Generator for ChatClient {
    fn stream(&self, messages: Vec<ChatMessage>) -> Increments {
        let request = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ChatRequest::streaming(&self.model, messages));
        stream::once(open(request)).try_flatten().boxed()
    }
}

async fn open(request: reqwest::RequestBuilder) -> Result<impl Stream<Item = Result<String>>> {
    let response = request
        .send()
        .await
        .context("Failed to reach the generation service")?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("generation service returned {}: {}", status, body);
    }

    let mut decoder = ChunkDecoder::default();
    Ok(response
        .bytes_stream()
        .map_err(anyhow::Error::from)
        .map_ok(move |bytes| stream::iter(decoder.push(&bytes).into_iter().map(Ok::<_, anyhow::Error>)))
        .try_flatten())
}
