//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::host::HostInput;
use crate::lobby::ConnectionId;
use crate::session::{ConnectionGuard, JoinCode};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Join code of the room
    pub code: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Only sockets presenting the current join code reach the host
    let code = JoinCode::new(&query.code);
    match state.relay.attach(&code) {
        Ok(guard) => {
            info!(connection = %guard.id(), code = %code, "WebSocket upgrade for room");
            ws.on_upgrade(move |socket| handle_socket(socket, guard, state))
        }
        Err(e) => {
            warn!(code = %code, error = %e, "WebSocket upgrade refused");
            (StatusCode::FORBIDDEN, e.to_string()).into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, mut guard: ConnectionGuard, state: AppState) {
    let connection = guard.id();
    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before asking for approval so no patch is missed
    let events_rx = state.host.subscribe();
    let input_tx = state.host.input_tx.clone();

    let (reply_tx, reply_rx) = oneshot::channel();
    if input_tx
        .send(HostInput::Connect {
            connection,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        error!(connection = %connection, "Host loop unavailable");
        return;
    }
    let (response, reply) = match reply_rx.await {
        Ok(answer) => answer,
        Err(_) => {
            error!(connection = %connection, "Host dropped approval request");
            return;
        }
    };

    let sent = send_msg(&mut ws_sink, &reply).await;
    if !response.approved {
        info!(connection = %connection, "Connection rejected, closing socket");
        let _ = ws_sink.close().await;
        return;
    }
    if let Err(e) = sent {
        debug!(connection = %connection, error = %e, "Failed to send welcome");
    } else {
        run_session(connection, &mut guard, ws_sink, ws_stream, input_tx.clone(), events_rx).await;
    }

    // Signal disconnect to host loop
    let _ = input_tx.send(HostInput::Disconnect { connection }).await;
    info!(connection = %connection, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection: ConnectionId,
    guard: &mut ConnectionGuard,
    ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<HostInput>,
    events_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let (direct_tx, direct_rx) = mpsc::channel::<ServerMsg>(32);

    // Spawn writer task: direct replies and host broadcasts -> WebSocket
    let writer_handle = tokio::spawn(write_outbound(connection, ws_sink, direct_rx, events_rx));
    let writer_abort = writer_handle.abort_handle();

    // Reader loop: WebSocket -> host loop
    loop {
        let result = tokio::select! {
            _ = guard.session_closed() => {
                info!(connection = %connection, "Session closed, dropping socket");
                let _ = direct_tx.try_send(ServerMsg::SessionClosed);
                break;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(client_msg) => {
                    if client_msg.is_rate_limited() && !rate_limiter.check_input() {
                        warn!(connection = %connection, "Rate limited input message");
                        continue;
                    }
                    if let ClientMsg::Ping { t } = client_msg {
                        let _ = direct_tx.try_send(ServerMsg::Pong { t });
                        continue;
                    }
                    let input = HostInput::Client {
                        connection,
                        msg: client_msg,
                    };
                    if input_tx.send(input).await.is_err() {
                        debug!(connection = %connection, "Input channel closed");
                        break;
                    }
                }
                Err(e) => {
                    warn!(connection = %connection, error = %e, "Failed to parse client message");
                    let _ = direct_tx.try_send(ServerMsg::error("bad_message", e.to_string()));
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(connection = %connection, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection = %connection, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection = %connection, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Let the writer flush what is queued, then stop it
    drop(direct_tx);
    if tokio::time::timeout(Duration::from_secs(1), writer_handle)
        .await
        .is_err()
    {
        writer_abort.abort();
    }
}

/// Forward direct replies and host broadcasts to the socket until the session
/// ends. Broadcasts already queued go out before `SessionClosed` and the close.
async fn write_outbound<S>(
    connection: ConnectionId,
    mut sink: S,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
    mut events_rx: broadcast::Receiver<ServerMsg>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let msg = tokio::select! {
            biased;
            direct = direct_rx.recv() => match direct {
                Some(ServerMsg::SessionClosed) => {
                    flush_broadcasts(connection, &mut sink, &mut events_rx).await;
                    let _ = send_msg(&mut sink, &ServerMsg::SessionClosed).await;
                    break;
                }
                Some(msg) => msg,
                None => {
                    flush_broadcasts(connection, &mut sink, &mut events_rx).await;
                    break;
                }
            },
            event = events_rx.recv() => match event {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        connection = %connection,
                        lagged_count = n,
                        "Client lagged, skipping {} messages", n
                    );
                    // Continue - patches carry absolute values
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection = %connection, "Broadcast channel closed");
                    break;
                }
            },
        };

        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(connection = %connection, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Send whatever the host has already broadcast without waiting for more
async fn flush_broadcasts<S>(
    connection: ConnectionId,
    sink: &mut S,
    events_rx: &mut broadcast::Receiver<ServerMsg>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let msg = match events_rx.try_recv() {
            Ok(msg) => msg,
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!(connection = %connection, lagged_count = n, "Client lagged during flush");
                continue;
            }
            Err(_) => return,
        };
        if let Err(e) = send_msg(sink, &msg).await {
            debug!(connection = %connection, error = %e, "WebSocket send failed during flush");
            return;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
