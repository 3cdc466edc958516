use crate::bridge::MediaStreamBridge;
use crate::config::Config;
use crate::generation::{ChatClient, GenerationOrchestrator};
use crate::session::{Session, SessionInputs};
use crate::synthesis::SynthesisAdapter;
use crate::telephony::{self, CallError};
use crate::transcription::TranscriptionAdapter;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// State shared by every request. Nothing here is mutated per call.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    http: reqwest::Client,
    connections: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            connections: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/streams", get(streams))
        .route("/ping", post(ping))
        .route("/twiml", post(twiml))
        .route("/outbound", post(outbound))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "pong" }))
}

async fn twiml(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/xml")],
        telephony::stream_twiml(&state.config.public_host),
    )
        .into_response()
}

async fn outbound(State(state): State<AppState>, body: Bytes) -> Response {
    let request: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("invalid outbound call request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
    };
    let Some(to) = request.get("to").and_then(|to| to.as_str()).filter(|to| !to.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'to' phone number");
    };

    let result = match state.config.twilio.as_ref() {
        Some(twilio) => {
            let url = telephony::callback_url(&state.config.public_host);
            telephony::place_call(&state.http, twilio, to, &url).await
        }
        None => Err(CallError::NotConfigured),
    };
    match result {
        Ok(call_sid) => Json(json!({ "success": true, "callSid": call_sid })).into_response(),
        Err(e) => {
            tracing::error!("failed to place outbound call: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn streams(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!(connection, "media stream upgrade request received");
    ws.on_upgrade(move |socket| {
        let span = tracing::info_span!("call", connection, stream_sid = tracing::field::Empty);
        handle_call(socket, state).instrument(span)
    })
}

/// Runs one call from socket accept to teardown.
async fn handle_call(socket: WebSocket, state: AppState) {
    let config = &state.config;
    let listen_url = crate::utils::listen_url(&config.listen_url, &config.listen);
    let adapters = tokio::try_join!(
        TranscriptionAdapter::connect(&listen_url, &config.deepgram_api_key),
        SynthesisAdapter::connect(&config.speak_url, &config.deepgram_api_key),
    );
    let ((transcriber, transcripts), (synthesizer, speech)) = match adapters {
        Ok(adapters) => adapters,
        Err(e) => {
            tracing::error!("failed to set up speech services, dropping call: {:#}", e);
            return;
        }
    };

    let (sink, stream) = socket.split();
    let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));
    let stream = stream
        .take_while(|message| {
            future::ready(match message {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("media stream error: {}", e);
                    false
                }
            })
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                _ => None,
            })
        });
    let (bridge, media) = MediaStreamBridge::attach(Box::pin(sink), Box::pin(stream));

    let generator = Arc::new(ChatClient::new(
        state.http.clone(),
        &config.openai_base_url,
        &config.openai_api_key,
        &config.chat_model,
    ));
    tracing::info!(model = generator.model(), "call ready");
    let turns = GenerationOrchestrator::new(generator, &config.system_prompt, config.retain_history);
    let session = Session::new(
        turns,
        Box::new(bridge),
        Box::new(transcriber),
        Box::new(synthesizer),
    );
    session
        .run(SessionInputs {
            media,
            transcripts,
            speech,
        })
        .await;
    tracing::info!("media stream closed");
}
