/// Audio data encoded as base64
pub type Base64EncodedAudio = String;

/// Direction of an audio track relative to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Inbound,
    Outbound,
}

/// Events sent by the telephony peer over the media-stream websocket.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaEvent {
    Connected(ConnectedEvent),
    Start(StartEvent),
    Media(MediaMessage),
    Mark(MarkEvent),
    Stop(StopEvent),
    Close,
}

impl MediaEvent {
    /// The stream identifier carried by the event, if any.
    pub fn stream_sid(&self) -> Option<&str> {
        match self {
            MediaEvent::Start(event) => event.stream_sid(),
            MediaEvent::Media(event) => event.stream_sid(),
            MediaEvent::Mark(event) => event.stream_sid.as_deref(),
            MediaEvent::Stop(event) => event.stream_sid.as_deref(),
            MediaEvent::Connected(_) | MediaEvent::Close => None,
        }
    }

    /// Whether the event ends the media stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaEvent::Stop(_) | MediaEvent::Close)
    }
}

/// `connected` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConnectedEvent {
    protocol: Option<String>,
    version: Option<String>,
}

impl ConnectedEvent {
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// `start` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEvent {
    stream_sid: Option<String>,
    sequence_number: Option<String>,
    /// Stream metadata
    start: StreamMetadata,
}

impl StartEvent {
    /// The stream id, from the envelope or from the metadata block.
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid
            .as_deref()
            .or(self.start.stream_sid.as_deref())
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.start
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    stream_sid: Option<String>,
    call_sid: Option<String>,
    account_sid: Option<String>,
    #[serde(default)]
    tracks: Vec<String>,
    media_format: Option<MediaFormat>,
    #[serde(default)]
    custom_parameters: serde_json::Map<String, serde_json::Value>,
}

impl StreamMetadata {
    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    pub fn media_format(&self) -> Option<&MediaFormat> {
        self.media_format.as_ref()
    }

    pub fn custom_parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.custom_parameters
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    /// ex: "audio/x-mulaw"
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// `media` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    stream_sid: Option<String>,
    sequence_number: Option<String>,
    media: MediaPayload,
}

impl MediaMessage {
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn track(&self) -> Track {
        self.media.track
    }

    pub fn payload(&self) -> &str {
        &self.media.payload
    }

    pub fn chunk(&self) -> Option<&str> {
        self.media.chunk.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaPayload {
    track: Track,
    chunk: Option<String>,
    timestamp: Option<String>,
    /// Companded audio, base64 encoded
    payload: Base64EncodedAudio,
}

/// `mark` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEvent {
    stream_sid: Option<String>,
    mark: Option<MarkLabel>,
}

impl MarkEvent {
    pub fn name(&self) -> Option<&str> {
        self.mark.as_ref().map(|mark| mark.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarkLabel {
    name: String,
}

/// `stop` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEvent {
    stream_sid: Option<String>,
    stop: Option<StopMetadata>,
}

impl StopEvent {
    pub fn call_sid(&self) -> Option<&str> {
        self.stop.as_ref().and_then(|stop| stop.call_sid.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    account_sid: Option<String>,
    call_sid: Option<String>,
}

/// Messages sent to the telephony peer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutboundMedia {
    pub payload: Base64EncodedAudio,
}

impl OutboundMessage {
    pub fn media(stream_sid: &str, payload: Base64EncodedAudio) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutboundMessage::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}
