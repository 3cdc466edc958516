//! Twilio helpers: the TwiML answer that connects a call to `/streams` and outbound call placement.

use crate::config::TwilioConfig;
use crate::consts::TWILIO_BASE_URL;
use secrecy::ExposeSecret;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Twilio credentials are not configured")]
    NotConfigured,
    #[error("Failed to reach Twilio: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Twilio rejected the call ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, serde::Deserialize)]
struct CallResource {
    sid: String,
}

/// TwiML that streams the call's audio to this service.
pub fn stream_twiml(public_host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Connect>\n    <Stream url=\"wss://{}/streams\" />\n  </Connect>\n</Response>\n",
        strip_scheme(public_host)
    )
}

/// The URL Twilio fetches TwiML from when an outbound call is answered.
pub fn callback_url(public_host: &str) -> String {
    let host = public_host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/twiml", host)
    } else {
        format!("https://{}/twiml", host)
    }
}

fn strip_scheme(host: &str) -> &str {
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/')
}

/// Places an outbound call that fetches its TwiML from `twiml_url`. Returns the call sid.
pub async fn place_call(
    http: &reqwest::Client,
    twilio: &TwilioConfig,
    to: &str,
    twiml_url: &str,
) -> Result<String, CallError> {
    let url = format!("{}/Accounts/{}/Calls.json", TWILIO_BASE_URL, twilio.account_sid);
    let response = http
        .post(url)
        .basic_auth(&twilio.account_sid, Some(twilio.auth_token.expose_secret()))
        .form(&[
            ("To", to),
            ("From", twilio.from_number.as_str()),
            ("Url", twiml_url),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CallError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    let call: CallResource = response.json().await?;
    tracing::info!(call_sid = %call.sid, "outbound call placed to {}", to);
    Ok(call.sid)
}
