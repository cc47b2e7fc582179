//! WebSocket connection handler
//!
//! Translates inbound text signals into decoder control calls, forwards
//! binary PCM into the feature pipeline, and publishes partial and final
//! results back as text frames.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::messages::{ClientSignal, ServerMessage};
use crate::metrics;
use crate::session::SpeechSession;
use crate::state::AppState;

type WsSender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket upgrade endpoint
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_message(sender: &WsSender, message: &ServerMessage) {
    let mut guard = sender.lock().await;
    if let Err(e) = guard.send(Message::Text(message.to_json())).await {
        tracing::debug!("failed to send message: {}", e);
    }
}

/// Forward decoder results to the client; single writer per session
async fn forward_results(mut rx: mpsc::Receiver<ServerMessage>, sender: WsSender) {
    while let Some(message) = rx.recv().await {
        send_message(&sender, &message).await;
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(tokio::sync::Mutex::new(sender));

    if state.sessions.register(&session_id).is_err() {
        send_message(&sender, &ServerMessage::failed("server at capacity")).await;
        return;
    }
    metrics::record_session_created();
    metrics::record_active_sessions(state.sessions.count());

    let mut session: Option<SpeechSession> = None;
    let mut forwarder: Option<tokio::task::JoinHandle<()>> = None;
    let mut got_end = false;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientSignal>(&text) {
                Ok(ClientSignal::Start {
                    nbest,
                    continuous_decoding,
                }) => {
                    if session.is_some() {
                        send_message(&sender, &ServerMessage::failed("already started")).await;
                        continue;
                    }
                    let nbest = nbest.unwrap_or(state.config.decode.nbest);
                    let continuous_decoding =
                        continuous_decoding.unwrap_or(state.config.decode.continuous_decoding);
                    tracing::info!(
                        session_id = %session_id,
                        nbest,
                        continuous_decoding,
                        "utterance stream opened"
                    );
                    let (speech, rx) = SpeechSession::spawn(
                        session_id.clone(),
                        state.model.clone(),
                        state.symbols.clone(),
                        state.context.clone(),
                        state.fbank_config(),
                        state.decode_options(nbest),
                        continuous_decoding,
                    );
                    forwarder = Some(tokio::spawn(forward_results(rx, sender.clone())));
                    session = Some(speech);
                }
                Ok(ClientSignal::End) => match &session {
                    Some(speech) => {
                        speech.finish_input();
                        got_end = true;
                        break;
                    }
                    None => {
                        send_message(&sender, &ServerMessage::failed("start signal expected"))
                            .await;
                    }
                },
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "invalid text message: {}", e);
                    send_message(&sender, &ServerMessage::failed("invalid message")).await;
                }
            },
            Ok(Message::Binary(data)) => match &session {
                Some(speech) => speech.accept_audio(&data),
                None => {
                    send_message(&sender, &ServerMessage::failed("start signal expected")).await;
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, "websocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // On a mid-utterance disconnect the decoder unwinds without a final;
    // on a clean end it drains and emits the terminal message first.
    if let Some(speech) = session {
        if !got_end {
            speech.cancel();
        }
        speech.join().await;
    }
    if let Some(task) = forwarder {
        let _ = task.await;
    }

    state.sessions.remove(&session_id);
    metrics::record_active_sessions(state.sessions.count());
    tracing::info!(session_id = %session_id, "websocket closed");
}
