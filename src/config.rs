//! Process configuration.
//!
//! Loaded once at startup and shared read-only by every call as `Arc<Config>`.

use crate::consts::{
    DEEPGRAM_API_KEY, DEFAULT_CHAT_MODEL, DEFAULT_PORT, DEFAULT_SYSTEM_PROMPT, LISTEN_URL,
    OPENAI_API_KEY, OPENAI_BASE_URL, SPEAK_URL,
};
use crate::types::ListenOptions;
use secrecy::SecretString;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials for placing outbound calls.
#[derive(Debug)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Public host name of this service, used in TwiML and call callbacks.
    pub public_host: String,
    pub deepgram_api_key: SecretString,
    pub openai_api_key: SecretString,
    pub openai_base_url: String,
    pub chat_model: String,
    pub system_prompt: String,
    /// Keep the conversation so far in every generation request of a call.
    pub retain_history: bool,
    pub listen_url: String,
    pub speak_url: String,
    pub listen: ListenOptions,
    pub twilio: Option<TwilioConfig>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address to bind to. Defaults to `0.0.0.0:$PORT` (`PORT` defaults to 8080).
    /// *   `SERVER`: Public host name used in TwiML. Defaults to "localhost".
    /// *   `DEEPGRAM_API_KEY`: Key for the recognizer and the synthesizer. Required.
    /// *   `OPENAI_API_KEY`: Key for the generation service. Required.
    /// *   `OPENAI_BASE_URL`, `CHAT_MODEL`, `SYSTEM_PROMPT`: (Optional) Generation settings.
    /// *   `RETAIN_HISTORY`: (Optional) "true" keeps conversation history within a call.
    /// *   `DEEPGRAM_STT_WS_URL`, `DEEPGRAM_TTS_WS_URL`: (Optional) Recognizer and synthesizer endpoints.
    /// *   `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_PHONE_NUMBER`: (Optional) Outbound calls.
    /// *   `LOG_LEVEL`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = match var("BIND_ADDRESS") {
            Some(address) => address,
            None => format!(
                "0.0.0.0:{}",
                var("PORT").unwrap_or_else(|| DEFAULT_PORT.to_string())
            ),
        };
        let bind_address = bind_address
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let deepgram_api_key = var(DEEPGRAM_API_KEY)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingVar(DEEPGRAM_API_KEY.to_string()))?;
        let openai_api_key = var(OPENAI_API_KEY)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingVar(OPENAI_API_KEY.to_string()))?;

        let retain_history = match var("RETAIN_HISTORY") {
            Some(value) => parse_bool("RETAIN_HISTORY", &value)?,
            None => false,
        };

        let log_level_str = var("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "LOG_LEVEL".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let twilio = match (var("TWILIO_ACCOUNT_SID"), var("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioConfig {
                account_sid,
                auth_token: SecretString::from(auth_token),
                from_number: var("TWILIO_PHONE_NUMBER")
                    .or_else(|| var("TWILIO_NUMBER"))
                    .unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Self {
            bind_address,
            public_host: var("SERVER").unwrap_or_else(|| "localhost".to_string()),
            deepgram_api_key: SecretString::from(deepgram_api_key),
            openai_api_key: SecretString::from(openai_api_key),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            chat_model: var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            system_prompt: var("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            retain_history,
            listen_url: var("DEEPGRAM_STT_WS_URL").unwrap_or_else(|| LISTEN_URL.to_string()),
            speak_url: var("DEEPGRAM_TTS_WS_URL").unwrap_or_else(|| SPEAK_URL.to_string()),
            listen: ListenOptions::default(),
            twilio,
            log_level,
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", value),
        )),
    }
}
