//! Voice gateway websocket
//!
//! The socket is split: a writer task drains the connection's outbound queue
//! into the sink, while the read half is fed to `VoiceConnection::serve` as
//! a stream of text frames.

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{future, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::http::AppState;
use crate::voice::{Outbound, VoiceConnection};

/// Frames queued for one client before handlers wait on the writer
const OUTBOUND_BUFFER: usize = 256;

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Voice websocket connection established");

    let (mut sink, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    // Outbound queue -> websocket
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let message = match outbound {
                Outbound::Frame(envelope) => match serde_json::to_string(&envelope) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        error!(error = %e, "Failed to encode voice frame");
                        continue;
                    }
                },
                Outbound::Close(code) => {
                    let frame = CloseFrame {
                        code: code.code(),
                        reason: Utf8Bytes::from_static(code.reason()),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    break;
                }
            };
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Failed to send voice frame");
                break;
            }
        }
    });

    // Text frames until the client closes or the socket errors
    let incoming = receiver
        .take_while(|message| future::ready(matches!(message, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text.to_string()),
                _ => None,
            })
        });

    VoiceConnection::new(state.gateway, tx).serve(incoming).await;

    if let Err(e) = writer.await {
        error!(error = %e, "Voice websocket writer failed");
    }
    info!("Voice websocket connection closed");
}
