use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::{ACTIVE_CONNECTIONS, CONNECTIONS_TOTAL};
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

// One task writes the session's queue to the socket, the other reads client
// frames. Whichever ends first tears the session down.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let address = addr.ip().to_canonical().to_string();
    CONNECTIONS_TOTAL.inc();
    ACTIVE_CONNECTIONS.inc();

    let tracker = state.tracker;
    let mut rx = tracker.on_connect(&session_id, &address).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_tracker = tracker.clone();
    let reader_id = session_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    reader_tracker.handle_message(&reader_id, text.as_str());
                }
                Ok(Message::Binary(_)) => {
                    warn!(session_id = %reader_id, "ignoring binary frame");
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong handled by axum
                Err(e) => {
                    debug!(session_id = %reader_id, error = %e, "socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    tracker.on_disconnect(&session_id).await;
    ACTIVE_CONNECTIONS.dec();
}
