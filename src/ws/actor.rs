//! Actor-per-connection gateway loop.
//!
//! Splits the WebSocket into reader and writer halves: the writer task owns
//! the sink and forwards from the connection's mpsc channel; the reader loop
//! dispatches client commands. Per-connection ordering: presence registration
//! happens strictly before the connection can receive any delivery (room
//! join), and room leave happens strictly before unregistration, so no event
//! reaches a connection outside its registered window. Cleanup runs exactly
//! once — the reader loop is the single exit point and unregistration is
//! idempotent underneath it.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::events::PresenceUpdate;
use crate::state::AppState;
use crate::ws::protocol::{self, ServerMessage};
use crate::ws::rooms::LocalConnection;

pub async fn run_connection(socket: WebSocket, state: AppState, claims: Claims) {
    let connection_id = format!("cx_{}", Uuid::now_v7().simple());
    let user_id = claims.sub;
    let tenant_id = claims.tenant_id;

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register presence first: the connection must be accounted for before
    // the first delivery can reach it.
    let online = state
        .registry
        .register(&user_id, &tenant_id, &connection_id)
        .await;

    // Joining the rooms is what subscribes this connection to deliveries.
    let conn = state.rooms.join(LocalConnection::new(
        connection_id.clone(),
        user_id.clone(),
        tenant_id.clone(),
        claims.elevated,
        tx.clone(),
    ));

    // Announce the join cluster-wide. Both signals are advisory: a store
    // failure degrades visibility, it does not fail the connection.
    let update = PresenceUpdate {
        tenant_id: tenant_id.clone(),
        user_id: user_id.clone(),
        connection_id: connection_id.clone(),
        online,
        joined: true,
        timestamp: Utc::now(),
    };
    if let Err(err) = state.publisher.publish_presence(&update).await {
        tracing::warn!(connection_id = %connection_id, error = %err, "presence delta not distributed");
    }
    if let Err(err) = state
        .publisher
        .connection_event(&tenant_id, &user_id, &connection_id, online, true)
        .await
    {
        tracing::debug!(connection_id = %connection_id, error = %err, "connect event not published");
    }

    if let Some(welcome) = (ServerMessage::Welcome {
        connection_id: connection_id.clone(),
        tenant_id: tenant_id.clone(),
        online,
    })
    .encode()
    {
        let _ = tx.send(welcome);
    }

    tracing::info!(
        user_id = %user_id,
        tenant_id = %tenant_id,
        connection_id = %connection_id,
        "gateway connection joined"
    );

    // Writer task: forwards mpsc messages to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: periodic pings, close on missed pong.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_interval = state.settings.ping_interval;
    let pong_timeout = state.settings.pong_timeout;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick.
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone.
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: the single exit point that triggers cleanup.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &conn, &state).await;
                }
                Message::Binary(_) => {
                    if let Some(encoded) = (ServerMessage::Error {
                        code: 400,
                        message: "binary frames not supported".to_string(),
                    })
                    .encode()
                    {
                        let _ = tx.send(encoded);
                    }
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "client initiated close"
                    );
                    break;
                }
            },
            Some(Err(err)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "WebSocket receive error"
                );
                break;
            }
            None => break,
        }
    }

    // Cleanup, in order: stop deliveries (leave rooms), then unregister
    // presence, then announce. Unregister is idempotent, so overlapping with
    // TTL expiry or the cleanup pass is harmless.
    writer_handle.abort();
    ping_handle.abort();

    state.rooms.leave(&connection_id);

    if let Some(unregistered) = state.registry.unregister(&connection_id).await {
        let update = PresenceUpdate {
            tenant_id: unregistered.tenant_id.clone(),
            user_id: unregistered.user_id.clone(),
            connection_id: connection_id.clone(),
            online: unregistered.remaining,
            joined: false,
            timestamp: Utc::now(),
        };
        if let Err(err) = state.publisher.publish_presence(&update).await {
            tracing::warn!(connection_id = %connection_id, error = %err, "presence delta not distributed");
        }
        if let Err(err) = state
            .publisher
            .connection_event(
                &unregistered.tenant_id,
                &unregistered.user_id,
                &connection_id,
                unregistered.remaining,
                false,
            )
            .await
        {
            tracing::debug!(connection_id = %connection_id, error = %err, "disconnect event not published");
        }
    }

    tracing::info!(
        user_id = %user_id,
        tenant_id = %tenant_id,
        connection_id = %connection_id,
        "gateway connection closed"
    );
}

/// Writer task: receives messages from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken.
            break;
        }
    }
}
