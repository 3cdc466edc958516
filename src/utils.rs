use crate::consts::AUTHORIZATION_HEADER;
use crate::types::ListenOptions;
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

/// Builds an authenticated websocket handshake request for the speech services.
pub fn build_request(url: &str, api_key: &SecretString) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION_HEADER,
        format!("Token {}", api_key.expose_secret()).as_str().parse()?,
    );
    Ok(request)
}

/// Appends the recognizer options to the `listen` endpoint.
pub fn listen_url(base_url: &str, options: &ListenOptions) -> String {
    let query = options
        .query_pairs()
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base_url, separator, query)
}
