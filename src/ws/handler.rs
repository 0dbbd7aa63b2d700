//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ClientSession, Difficulty, GameMode};
use crate::http::routes::AppError;
use crate::util::rate_limit::TransportRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub match_id: Uuid,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    /// Identity established by the upstream auth gateway
    pub user_id: Uuid,
}

/// WebSocket upgrade handler
///
/// The seat is taken before upgrading so a full or closed match is refused
/// with a plain HTTP error.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let attached = state
        .match_registry
        .attach_client(query.match_id, query.mode, query.difficulty, query.user_id)
        .await;

    match attached {
        Ok((session, snapshot_rx)) => {
            info!(
                match_id = %session.match_id,
                user_id = %session.user_id,
                slot = %session.slot,
                "WebSocket upgrade for seated player"
            );
            let rate_limit = state.config.input_rate_limit;
            ws.on_upgrade(move |socket| handle_socket(socket, session, snapshot_rx, rate_limit))
        }
        Err(e) => {
            warn!(match_id = %query.match_id, user_id = %query.user_id, error = %e, "WebSocket attach refused");
            AppError::from(e).into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    session: ClientSession,
    snapshot_rx: broadcast::Receiver<ServerMsg>,
    rate_limit: u32,
) {
    let (match_id, user_id) = (session.match_id, session.user_id);
    let (ws_sink, ws_stream) = socket.split();

    run_session(session, ws_sink, ws_stream, snapshot_rx, TransportRateLimiter::new(rate_limit)).await;

    // The session was dropped above, which detaches it from the match
    info!(match_id = %match_id, user_id = %user_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    session: ClientSession,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
    rate_limiter: TransportRateLimiter,
) {
    let user_id = session.user_id;
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(16);

    // Writer task: match broadcasts and direct replies -> WebSocket
    let mut writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(msg) => msg,
                    None => break,
                },
                snapshot = snapshot_rx.recv() => match snapshot {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping {} snapshots", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(user_id = %user_id, "Match closed");
                        let _ = send_msg(&mut ws_sink, &ServerMsg::Error {
                            code: "match_closed".to_string(),
                            message: "match is no longer running".to_string(),
                        })
                        .await;
                        break;
                    }
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> match task
    loop {
        let frame = tokio::select! {
            _ = &mut writer => break,
            frame = ws_stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if !rate_limiter.check_input() {
                    debug!(user_id = %user_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Ping) => {
                        if reply_tx.send(ServerMsg::Pong).await.is_err() {
                            break;
                        }
                    }
                    Ok(client_msg) => {
                        if !session.send(client_msg).await {
                            debug!(user_id = %user_id, "Match input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Some(Err(e)) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer.abort();
    drop(session);
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
