use super::TranscriptFragment;

/// Accumulates finalized fragments until an utterance boundary.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    parts: Vec<String>,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fragment. Returns the completed utterance when the fragment closes it.
    ///
    /// Interim fragments are never accumulated.
    pub fn push(&mut self, fragment: &TranscriptFragment) -> Option<String> {
        if fragment.is_final {
            let text = fragment.text.trim();
            if !text.is_empty() {
                self.parts.push(text.to_string());
            }
        }
        if fragment.is_speech_final {
            self.take()
        } else {
            None
        }
    }

    /// The recognizer reported prolonged silence; closes the utterance like a speech-final fragment.
    pub fn utterance_end(&mut self) -> Option<String> {
        self.take()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn take(&mut self) -> Option<String> {
        if self.parts.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.parts).join(" "))
    }
}
