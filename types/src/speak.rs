/// Commands sent to the synthesizer, in order, as text frames.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum SpeakCommand {
    /// Queue text for synthesis.
    Speak { text: String },
    /// Render everything queued so far without waiting for more text.
    Flush,
    /// Drop queued text and any audio not yet sent.
    Clear,
    Close,
}

impl SpeakCommand {
    pub fn speak(text: &str) -> Self {
        SpeakCommand::Speak {
            text: text.to_string(),
        }
    }
}

/// Control and metadata messages received from the synthesizer. Audio arrives as binary frames.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum SpeakEvent {
    Metadata {
        request_id: Option<String>,
        model_name: Option<String>,
    },
    Flushed {
        sequence_id: Option<u64>,
    },
    Cleared {
        sequence_id: Option<u64>,
    },
    Warning {
        description: Option<String>,
        code: Option<String>,
    },
    Error {
        description: Option<String>,
        code: Option<String>,
    },
    #[serde(other)]
    Unknown,
}
