use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use parlor_api::AppState;
use parlor_feed::{FeedError, Subscription};
use parlor_session::notify::NotificationDispatcher;
use parlor_session::presence::HeartbeatTask;
use parlor_session::synchronizer::MessageSynchronizer;
use parlor_types::events::{EventKind, SessionCommand, SessionEvent, Table};
use parlor_types::models::AuthContext;

/// Baseline window replayed to a freshly connected client.
const INITIAL_WINDOW: u32 = 50;

/// Drive one authenticated WebSocket session: replay the baseline, start
/// the heartbeat, reconcile feed events into the session log, and forward
/// everything to the client until either side goes away.
pub async fn handle_session(socket: WebSocket, state: AppState, ctx: AuthContext) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", ctx.display_name, ctx.user_id);

    let ready = SessionEvent::Ready {
        user_id: ctx.user_id,
        display_name: ctx.display_name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Per-session plumbing
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    let notifier = Arc::new(NotificationDispatcher::new(ctx.user_id, alert_tx));

    // Subscribe before the initial load so nothing slips between the two;
    // the synchronizer dedups anything delivered twice.
    let message_sub = match state.feed.subscribe(Table::Messages, &[EventKind::Insert]) {
        Ok(sub) => sub,
        Err(e) => {
            warn!("gateway message subscribe failed: {}", e);
            return;
        }
    };
    let message_cancel = message_sub.cancel_handle();

    let sticker_sub = match state
        .feed
        .subscribe(Table::Stickers, &[EventKind::Insert, EventKind::Delete])
    {
        Ok(sub) => sub,
        Err(e) => {
            warn!("gateway sticker subscribe failed: {}", e);
            return;
        }
    };
    let sticker_cancel = sticker_sub.cancel_handle();

    let synchronizer = Arc::new(MessageSynchronizer::new(state.db.clone(), INITIAL_WINDOW));
    if let Err(e) = synchronizer.initial_load().await {
        warn!("initial message load failed: {}", e);
        return;
    }
    let _ = event_tx.send(SessionEvent::MessageHistory {
        messages: synchronizer.log().snapshot(),
    });

    match state.presence.list().await {
        Ok(users) => {
            let _ = event_tx.send(SessionEvent::PresenceSnapshot { users });
        }
        Err(e) => warn!("presence snapshot failed: {}", e),
    }

    // The heartbeat lives exactly as long as the session.
    let heartbeat = HeartbeatTask::start(state.presence.clone(), ctx.user_id);

    let sync_task = {
        let synchronizer = synchronizer.clone();
        let feed = state.feed.clone();
        let event_tx = event_tx.clone();
        let notifier = notifier.clone();
        tokio::spawn(async move {
            synchronizer.run(feed, message_sub, event_tx, notifier).await;
        })
    };

    let sticker_task = {
        let state = state.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            run_sticker_relay(state, sticker_sub, event_tx).await;
        })
    };

    let mut send_task = tokio::spawn(run_send_loop(sender, event_rx, alert_rx));
    let mut recv_task = tokio::spawn(run_recv_loop(
        receiver,
        notifier.clone(),
        ctx.display_name.clone(),
    ));

    // Wait for either side to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Teardown: no timer, task, or subscription outlives the connection.
    message_cancel.cancel();
    sticker_cancel.cancel();
    heartbeat.stop();
    sync_task.abort();
    sticker_task.abort();

    info!(
        "{} ({}) disconnected from gateway",
        ctx.display_name, ctx.user_id
    );
}

/// Forward session events and alerts to the client.
async fn run_send_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    mut alert_rx: mpsc::UnboundedReceiver<parlor_session::notify::Alert>,
) {
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            alert = alert_rx.recv() => {
                let Some(alert) = alert else { break };
                let event = SessionEvent::Notification {
                    title: alert.title,
                    body: alert.body,
                    ttl_ms: alert.ttl_ms,
                };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Read client commands until the socket closes.
async fn run_recv_loop(
    mut receiver: SplitStream<WebSocket>,
    notifier: Arc<NotificationDispatcher>,
    display_name: String,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(text) => match serde_json::from_str::<SessionCommand>(&text) {
                Ok(SessionCommand::SetNotifications { enabled }) => {
                    notifier.set_enabled(enabled);
                }
                Err(e) => warn!("{} bad command: {}", display_name, e),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}

/// Keep the client's sticker library current: inserts are re-fetched for
/// their full record, deletes forward just the id.
async fn run_sticker_relay(
    state: AppState,
    mut sub: Subscription,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        match sub.recv().await {
            Ok(event) => match event.kind {
                EventKind::Insert => {
                    let db = state.db.clone();
                    let row_id = event.row_id.clone();
                    let row = match tokio::task::spawn_blocking(move || db.get_sticker(&row_id))
                        .await
                    {
                        Ok(Ok(Some(row))) => row,
                        // deleted again before we could fetch it
                        Ok(Ok(None)) => continue,
                        Ok(Err(e)) => {
                            warn!("sticker fetch failed: {}", e);
                            continue;
                        }
                        Err(e) => {
                            warn!("spawn_blocking join error: {}", e);
                            continue;
                        }
                    };
                    match row.into_sticker() {
                        Ok(sticker) => {
                            if events.send(SessionEvent::StickerAdd { sticker }).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("corrupt sticker row: {}", e),
                    }
                }
                EventKind::Delete => match event.row_id.parse::<uuid::Uuid>() {
                    Ok(id) => {
                        if events.send(SessionEvent::StickerRemove { id }).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("bad sticker row id on feed: {}", event.row_id),
                },
            },
            Err(FeedError::Lagged(n)) => {
                // the library is small; the client re-fetches it on demand
                warn!("sticker feed lagged by {}", n);
            }
            Err(_) => break,
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &SessionEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap();
    sender.send(WsMessage::Text(text.into())).await
}
