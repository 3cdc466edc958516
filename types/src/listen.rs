/// Recognizer options, fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ListenOptions {
    /// ex: "nova-2-phonecall"
    model: String,
    /// ex: "en"
    language: String,
    /// Sample encoding of the audio fed to the recognizer, ex: "mulaw"
    encoding: String,
    sample_rate: u32,
    channels: u16,
    smart_format: bool,
    no_delay: bool,
    /// Emit interim (non-final) results. Barge-in depends on them.
    interim_results: bool,
    /// Silence in milliseconds before a segment is finalized.
    endpointing: u32,
    /// Silence in milliseconds before the recognizer forces an utterance end.
    utterance_end_ms: u32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            model: "nova-2-phonecall".to_string(),
            language: "en".to_string(),
            encoding: "mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
            smart_format: true,
            no_delay: true,
            interim_results: true,
            endpointing: 300,
            utterance_end_ms: 1000,
        }
    }
}

impl ListenOptions {
    pub fn builder() -> ListenOptionsBuilder {
        ListenOptionsBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn endpointing(&self) -> u32 {
        self.endpointing
    }

    pub fn utterance_end_ms(&self) -> u32 {
        self.utterance_end_ms
    }

    /// Query parameters understood by the `listen` endpoint.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("model", self.model.clone()),
            ("language", self.language.clone()),
            ("smart_format", self.smart_format.to_string()),
            ("encoding", self.encoding.clone()),
            ("sample_rate", self.sample_rate.to_string()),
            ("channels", self.channels.to_string()),
            ("multichannel", "false".to_string()),
            ("no_delay", self.no_delay.to_string()),
            ("interim_results", self.interim_results.to_string()),
            ("endpointing", self.endpointing.to_string()),
            ("utterance_end_ms", self.utterance_end_ms.to_string()),
        ]
    }
}

pub struct ListenOptionsBuilder {
    options: ListenOptions,
}

impl Default for ListenOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: ListenOptions::default(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.options.model = model.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.options.language = language.to_string();
        self
    }

    pub fn with_encoding(mut self, encoding: &str, sample_rate: u32, channels: u16) -> Self {
        self.options.encoding = encoding.to_string();
        self.options.sample_rate = sample_rate;
        self.options.channels = channels;
        self
    }

    pub fn with_interim_results(mut self, enabled: bool) -> Self {
        self.options.interim_results = enabled;
        self
    }

    pub fn with_endpointing(mut self, millis: u32) -> Self {
        self.options.endpointing = millis;
        self
    }

    pub fn with_utterance_end_ms(mut self, millis: u32) -> Self {
        self.options.utterance_end_ms = millis;
        self
    }

    pub fn build(self) -> ListenOptions {
        self.options
    }
}

/// Control messages sent to the recognizer as text frames.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ListenControl {
    KeepAlive,
    CloseStream,
}

/// Messages received from the recognizer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ListenEvent {
    Results(ResultsEvent),
    UtteranceEnd(UtteranceEndEvent),
    SpeechStarted(SpeechStartedEvent),
    Metadata(MetadataEvent),
    #[serde(other)]
    Unknown,
}

/// `Results` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultsEvent {
    channel: ResultsChannel,
    /// The recognizer committed this segment.
    #[serde(default)]
    is_final: bool,
    /// The recognizer considers the utterance complete.
    #[serde(default)]
    speech_final: bool,
    start: Option<f64>,
    duration: Option<f64>,
}

impl ResultsEvent {
    /// Transcript of the best alternative; empty when the recognizer heard nothing.
    pub fn transcript(&self) -> &str {
        self.channel
            .alternatives
            .first()
            .map(|alternative| alternative.transcript.as_str())
            .unwrap_or("")
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn speech_final(&self) -> bool {
        self.speech_final
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultsChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Alternative {
    transcript: String,
    confidence: Option<f64>,
}

/// `UtteranceEnd` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UtteranceEndEvent {
    last_word_end: Option<f64>,
}

impl UtteranceEndEvent {
    pub fn last_word_end(&self) -> Option<f64> {
        self.last_word_end
    }
}

/// `SpeechStarted` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpeechStartedEvent {
    timestamp: Option<f64>,
}

/// `Metadata` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetadataEvent {
    request_id: Option<String>,
    duration: Option<f64>,
    channels: Option<u32>,
}

impl MetadataEvent {
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}
