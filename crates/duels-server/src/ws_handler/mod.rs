mod dispatch;
pub(crate) mod outgoing;
mod parse;

use crate::{
    app_state::SharedState,
    connection_registry::ConnId,
    error::ApiError,
    local_connections::{CloseReason, LocalChannels},
};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::Response,
};
use duels_protocol::{events::ErrorCode, model::UserId};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use std::{net::SocketAddr, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use dispatch::dispatch_text;
use outgoing::{other_logon_frame, reply_error};

/// How long the reader may finish an in-flight frame after the writer stops.
const READER_DRAIN: Duration = Duration::from_secs(5);
/// How long the writer may flush the close notice after the reader stops.
const CLOSE_FLUSH: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    ticket: Option<String>,
}

/// Upgrades only after the single-use ticket has been consumed.
pub async fn ws_upgrade(
    State(state): State<SharedState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Some(ticket) = query.ticket.filter(|ticket| !ticket.is_empty()) else {
        debug!(%peer_addr, "connection.ticket_missing");
        return Err(ApiError::Unauthorized("missing ticket".to_string()));
    };

    let user_id = state
        .services()
        .tickets
        .consume(&ticket)
        .await
        .map_err(|err| {
            info!(%peer_addr, err = %err, "connection.ticket_rejected");
            ApiError::from(err)
        })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, peer_addr)))
}

async fn handle_socket(
    socket: WebSocket,
    state: SharedState,
    user_id: UserId,
    peer_addr: SocketAddr,
) {
    let (conn_id, channels) = match state.connect(user_id).await {
        Ok(registered) => registered,
        Err(err) => {
            warn!(user_id, %peer_addr, err = %err, "connection.register_failed");
            return;
        }
    };
    let opened_at = Instant::now();
    info!(%conn_id, user_id, %peer_addr, node_id = %state.node_id(), "connection.opened");

    state.resume_user(user_id).await;

    let LocalChannels {
        outbound_rx,
        close_rx,
    } = channels;
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        close_rx.clone(),
        state.config().ping_interval(),
        conn_id,
    ));
    let reader = tokio::spawn(read_loop(
        stream,
        state.clone(),
        close_rx.clone(),
        conn_id,
        user_id,
    ));
    join_socket_tasks(writer, reader, &close_rx).await;

    state.disconnect(conn_id, user_id).await;
    let active_connections = state.local().len().await;
    info!(
        %conn_id,
        user_id,
        connected_for_secs = opened_at.elapsed().as_secs(),
        active_connections,
        "connection.closed"
    );
}

/// Waits for either socket task to stop, then winds down the other one.
/// A pending close reason gives the writer time to send its close frames.
async fn join_socket_tasks(
    mut writer: JoinHandle<()>,
    mut reader: JoinHandle<()>,
    close_rx: &watch::Receiver<Option<CloseReason>>,
) {
    tokio::select! {
        _ = &mut writer => {
            if time::timeout(READER_DRAIN, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        _ = &mut reader => {
            let closing = close_rx.borrow().is_some();
            if !closing || time::timeout(CLOSE_FLUSH, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: SharedState,
    mut close_rx: watch::Receiver<Option<CloseReason>>,
    conn_id: ConnId,
    user_id: UserId,
) {
    let read_deadline = state.config().read_deadline();

    loop {
        let closing = close_rx.borrow().is_some();
        if closing {
            break;
        }

        let frame = tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            frame = time::timeout(read_deadline, stream.next()) => frame,
        };

        let message = match frame {
            Err(_) => {
                info!(
                    %conn_id,
                    user_id,
                    deadline_secs = read_deadline.as_secs(),
                    "connection.read_deadline"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(%conn_id, err = %err, "connection.read_failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let keep_going = match message {
            Message::Text(raw) => dispatch_text(&state, conn_id, user_id, raw.as_str()).await,
            Message::Binary(_) => {
                reply_error(
                    &state,
                    conn_id,
                    ErrorCode::InvalidPayload,
                    "binary frames are not supported",
                )
                .await
            }
            Message::Ping(_) | Message::Pong(_) => true,
            Message::Close(_) => false,
        };
        if !keep_going {
            break;
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut close_rx: watch::Receiver<Option<CloseReason>>,
    ping_interval: Duration,
    conn_id: ConnId,
) {
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else { break };
                if let Err(err) = sink.send(Message::Text(frame.into())).await {
                    debug!(%conn_id, err = %err, "connection.outbound_send_failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(err) = sink.send(Message::Ping(Default::default())).await {
                    debug!(%conn_id, err = %err, "connection.ping_send_failed");
                    break;
                }
            }
            changed = close_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let reason = *close_rx.borrow();
                if let Some(reason) = reason {
                    send_close(&mut sink, reason, conn_id).await;
                    break;
                }
            }
        }
    }
}

async fn send_close(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: CloseReason,
    conn_id: ConnId,
) {
    if reason == CloseReason::OtherLogon {
        if let Err(err) = sink.send(Message::Text(other_logon_frame().into())).await {
            debug!(%conn_id, err = %err, "connection.other_logon_send_failed");
        }
    }

    let frame = CloseFrame {
        code: close_code_for(reason),
        reason: reason.as_str().into(),
    };
    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
        debug!(%conn_id, err = %err, "connection.close_send_failed");
    }
    info!(%conn_id, reason = reason.as_str(), "connection.closing");
}

fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::OtherLogon => close_code::NORMAL,
        CloseReason::Overflow => close_code::POLICY,
        CloseReason::Shutdown => close_code::AWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        future::Future,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    fn assert_send<F: Future + Send>(_: F) {}

    #[test]
    fn socket_task_can_run_on_the_upgrade_executor() {
        let _check = |socket: WebSocket, state: SharedState, peer_addr: SocketAddr| {
            assert_send(handle_socket(socket, state, 1, peer_addr))
        };
    }

    #[tokio::test]
    async fn pending_close_lets_writer_finish() {
        let (close_tx, close_rx) = watch::channel(None);
        close_tx
            .send(Some(CloseReason::OtherLogon))
            .expect("receiver is alive");

        let flushed = Arc::new(AtomicBool::new(false));
        let writer_flag = flushed.clone();
        let writer = tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            writer_flag.store(true, Ordering::SeqCst);
        });
        let reader = tokio::spawn(async {});

        join_socket_tasks(writer, reader, &close_rx).await;
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reader_exit_without_close_reason_stops_writer() {
        let (_close_tx, close_rx) = watch::channel(None);
        let writer = tokio::spawn(std::future::pending::<()>());
        let reader = tokio::spawn(async {});

        time::timeout(
            Duration::from_secs(1),
            join_socket_tasks(writer, reader, &close_rx),
        )
        .await
        .expect("writer should be aborted without waiting");
    }

    #[test]
    fn close_codes_follow_reason() {
        assert_eq!(close_code_for(CloseReason::OtherLogon), 1000);
        assert_eq!(close_code_for(CloseReason::Shutdown), 1001);
        assert_eq!(close_code_for(CloseReason::Overflow), 1008);
    }
}
