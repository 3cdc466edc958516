use super::{Generator, Increments, TurnTimings};
use crate::synthesis::Synthesizer;
use crate::types::ChatMessage;
use futures::StreamExt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Generating,
    Completed,
    Cancelled,
}

/// What the active turn produced when polled.
#[derive(Debug)]
pub enum TurnProgress {
    Increment(String),
    /// The response ended normally.
    Exhausted,
    Failed(anyhow::Error),
}

struct ActiveTurn {
    number: u64,
    increments: Increments,
    response: String,
}

/// Owns the generation turn of one session. At most one turn is active at a time.
pub struct GenerationOrchestrator {
    generator: Arc<dyn Generator>,
    instructions: String,
    history: Option<Vec<ChatMessage>>,
    active: Option<ActiveTurn>,
    state: TurnState,
    turn: u64,
    timings: Option<TurnTimings>,
}

impl GenerationOrchestrator {
    pub fn new(generator: Arc<dyn Generator>, instructions: &str, retain_history: bool) -> Self {
        Self {
            generator,
            instructions: instructions.to_string(),
            history: retain_history.then(Vec::new),
            active: None,
            state: TurnState::Idle,
            turn: 0,
            timings: None,
        }
    }

    /// Starts a turn for `utterance`, cancelling a turn that is still generating.
    pub fn start(&mut self, utterance: &str) -> u64 {
        self.cancel();
        self.turn += 1;

        let mut messages = vec![ChatMessage::system(&self.instructions)];
        if let Some(history) = self.history.as_mut() {
            messages.extend(history.iter().cloned());
            history.push(ChatMessage::user(utterance));
        }
        messages.push(ChatMessage::user(utterance));

        tracing::info!(turn = self.turn, "turn started: {:?}", utterance);
        self.timings = Some(TurnTimings::start(self.turn));
        self.active = Some(ActiveTurn {
            number: self.turn,
            increments: self.generator.stream(messages),
            response: String::new(),
        });
        self.state = TurnState::Generating;
        self.turn
    }

    /// Pulls the next increment of the active turn. Never resolves while no turn is active.
    pub async fn next(&mut self) -> TurnProgress {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        match active.increments.next().await {
            Some(Ok(text)) => TurnProgress::Increment(text),
            Some(Err(e)) => TurnProgress::Failed(e),
            None => TurnProgress::Exhausted,
        }
    }

    /// Sends an increment of the active turn to the synthesizer.
    pub fn forward(&mut self, text: &str, synthesizer: &dyn Synthesizer) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Some(timings) = self.timings.as_mut() {
            timings.token(text);
        }
        active.response.push_str(text);
        synthesizer.speak(text);
    }

    /// Ends the active turn normally and returns the full response.
    pub fn complete(&mut self, synthesizer: &dyn Synthesizer) -> Option<String> {
        let active = self.active.take()?;
        synthesizer.flush();
        self.state = TurnState::Completed;
        if let Some(history) = self.history.as_mut() {
            history.push(ChatMessage::assistant(&active.response));
        }
        tracing::info!(turn = active.number, "turn completed: {:?}", active.response);
        Some(active.response)
    }

    /// Drops the active turn without consuming the rest of its increments.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                self.state = TurnState::Cancelled;
                tracing::info!(turn = active.number, "turn cancelled after {} chars", active.response.len());
                true
            }
            None => false,
        }
    }

    /// Records outbound audio against the latest turn.
    pub fn mark_audio(&mut self) {
        if let Some(timings) = self.timings.as_mut() {
            timings.audio();
        }
    }

    pub fn timings(&self) -> Option<&TurnTimings> {
        self.timings.as_ref()
    }

    pub fn history(&self) -> Option<&[ChatMessage]> {
        self.history.as_deref()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Number of turns started so far.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }
}
