use std::time::Duration;

pub const DEEPGRAM_API_KEY: &str = "DEEPGRAM_API_KEY";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

pub const LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
pub const SPEAK_URL: &str =
    "wss://api.deepgram.com/v1/speak?encoding=mulaw&sample_rate=8000&container=none";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const TWILIO_BASE_URL: &str = "https://api.twilio.com/2010-04-01";

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are funny, everything is a joke to you.";
pub const DEFAULT_PORT: u16 = 8080;

pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Interval between recognizer keep-alive messages.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Characters that close the first sentence of a response.
pub const SENTENCE_BOUNDARY_CHARS: [char; 6] = ['.', ',', '!', '?', ';', ':'];

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
