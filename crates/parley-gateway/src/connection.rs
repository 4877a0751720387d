use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use parley_types::events::{ClientCommand, ServerEvent};
use parley_types::models::User;

use crate::broker;
use crate::error::{AuthError, GatewayError};
use crate::presence::{self, Session};
use crate::relays;
use crate::state::GatewayState;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Run an authenticated WebSocket until either side goes away.
///
/// The token was already checked at the HTTP upgrade layer, so the session
/// is brought online straight away.
pub async fn handle_connection_authenticated(socket: WebSocket, state: GatewayState, user: User) {
    let (sender, receiver) = socket.split();
    let (session, rx) = presence::connect(&state, user).await;
    run_session(sender, receiver, state, session, rx).await;
}

/// Pump one session: a writer task draining the outbound queue and a reader
/// task running inbound commands. When the writer stops, the reader takes no
/// further frames but the command it is running finishes before teardown.
async fn run_session<Tx, Rx, E>(
    sender: Tx,
    receiver: Rx,
    state: GatewayState,
    session: Session,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
) where
    Tx: Sink<Message> + Unpin + Send + 'static,
    Rx: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let pong_received = Arc::new(AtomicBool::new(true));
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut send_task = tokio::spawn(forward_events(sender, rx, pong_received.clone()));
    let mut recv_task = tokio::spawn(read_commands(
        receiver,
        state.clone(),
        session.clone(),
        pong_received,
        stop_rx,
    ));

    tokio::select! {
        _ = &mut send_task => {
            let _ = stop_tx.send(true);
            if let Err(e) = recv_task.await {
                error!("Reader task for {} failed: {}", session.conn_id, e);
            }
        }
        _ = &mut recv_task => send_task.abort(),
    }

    presence::disconnect(&state, &session).await;
}

/// Inbound half. Only the wait for the next frame is cancellable; a command
/// that has started always runs to completion.
async fn read_commands<Rx, E>(
    mut receiver: Rx,
    state: GatewayState,
    session: Session,
    pong_received: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let next = tokio::select! {
            next = receiver.next() => next,
            _ = stop.changed() => break,
        };
        let Some(Ok(msg)) = next else { break };

        match msg {
            Message::Text(text) => {
                dispatch_text(&state, &session, text.as_str()).await;
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Refuse a handshake: one `error` event carrying the reason, then a close
/// frame. Nothing was registered, so there is nothing to tear down.
pub async fn reject_connection(mut socket: WebSocket, err: AuthError) {
    warn!("Refusing gateway connection: {}", err);

    if let Ok(text) = serde_json::to_string(&ServerEvent::error(err.to_string())) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: err.close_code(),
            reason: err.to_string().into(),
        })))
        .await;
}

/// Outbound half: drains the connection's event queue onto the socket and
/// keeps the heartbeat going.
async fn forward_events<Tx>(
    mut sender: Tx,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
    pong_received: Arc<AtomicBool>,
) where
    Tx: Sink<Message> + Unpin,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize outbound event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Parse one text frame and run it. Any failure, including a panic inside a
/// handler, is reported to this connection only and the loop carries on.
async fn dispatch_text(state: &GatewayState, session: &Session, text: &str) {
    let result = match serde_json::from_str::<ClientCommand>(text) {
        Ok(cmd) => {
            match AssertUnwindSafe(handle_command(state, session, cmd))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    error!(
                        "Command handler panicked for {} ({})",
                        session.user.username,
                        session.user_id()
                    );
                    Err(GatewayError::Store(anyhow::anyhow!("handler panicked")))
                }
            }
        }
        Err(e) => {
            warn!(
                "{} ({}) bad command: {} -- raw: {}",
                session.user.username,
                session.user_id(),
                e,
                truncate(text, 200)
            );
            Err(GatewayError::InvalidCommand)
        }
    };

    if let Err(e) = result {
        debug!("Command from {} failed: {}", session.user_id(), e);
        state
            .dispatcher
            .send_to_connection(session.conn_id, ServerEvent::error(e.client_message()))
            .await;
    }
}

pub async fn handle_command(
    state: &GatewayState,
    session: &Session,
    cmd: ClientCommand,
) -> Result<(), GatewayError> {
    match cmd {
        ClientCommand::JoinChat { chat_id } => {
            relays::join_chat(state, session, chat_id).await?;
        }

        ClientCommand::LeaveChat { chat_id } => {
            relays::leave_chat(state, session, chat_id).await;
        }

        ClientCommand::NewMessage {
            chat_id,
            content,
            attachments,
        } => {
            broker::post_message(state, session, chat_id, content, attachments).await?;
        }

        ClientCommand::TypingStart { chat_id } => {
            relays::typing(state, session, chat_id, true).await;
        }

        ClientCommand::TypingStop { chat_id } => {
            relays::typing(state, session, chat_id, false).await;
        }

        ClientCommand::MarkMessagesRead { chat_id } => {
            relays::mark_read(state, session, chat_id).await?;
        }

        ClientCommand::FriendRequestSent { recipient_id } => {
            relays::friend_request_sent(state, session, recipient_id).await;
        }

        ClientCommand::FriendRequestAccepted { sender_id } => {
            relays::friend_request_accepted(state, session, sender_id).await;
        }
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
