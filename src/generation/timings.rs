use crate::consts::SENTENCE_BOUNDARY_CHARS;
use std::time::Duration;
use tokio::time::Instant;

/// Latency observations for one turn. Purely informational.
#[derive(Debug, Clone)]
pub struct TurnTimings {
    turn: u64,
    started: Instant,
    first_token: Option<Instant>,
    first_sentence: Option<Instant>,
    first_audio: Option<Instant>,
}

impl TurnTimings {
    pub fn start(turn: u64) -> Self {
        Self {
            turn,
            started: Instant::now(),
            first_token: None,
            first_sentence: None,
            first_audio: None,
        }
    }

    /// Records a generated increment.
    pub fn token(&mut self, text: &str) {
        let now = Instant::now();
        if self.first_token.is_none() {
            self.first_token = Some(now);
            tracing::info!(turn = self.turn, "Time to First Token (TTFT): {}ms", (now - self.started).as_millis());
        }
        if self.first_sentence.is_none() && text.contains(&SENTENCE_BOUNDARY_CHARS[..]) {
            self.first_sentence = Some(now);
            tracing::debug!(turn = self.turn, "first sentence boundary after {}ms", (now - self.started).as_millis());
        }
    }

    /// Records an outbound audio chunk.
    pub fn audio(&mut self) {
        if self.first_audio.is_some() {
            return;
        }
        let now = Instant::now();
        self.first_audio = Some(now);
        tracing::info!(
            turn = self.turn,
            "Time to First Byte (TTFB): {}ms",
            now.saturating_duration_since(self.synthesis_started()).as_millis()
        );
        if let Some(sentence) = self.first_sentence {
            tracing::info!(
                turn = self.turn,
                "TTFB from first sentence boundary: {}ms",
                now.saturating_duration_since(sentence).as_millis()
            );
        }
    }

    pub fn time_to_first_token(&self) -> Option<Duration> {
        self.first_token.map(|at| at - self.started)
    }

    pub fn time_to_first_sentence(&self) -> Option<Duration> {
        self.first_sentence.map(|at| at - self.started)
    }

    /// Measured from the first token, when synthesis could first begin.
    pub fn time_to_first_audio(&self) -> Option<Duration> {
        self.first_audio
            .map(|at| at.saturating_duration_since(self.synthesis_started()))
    }

    fn synthesis_started(&self) -> Instant {
        self.first_token.unwrap_or(self.started)
    }
}
