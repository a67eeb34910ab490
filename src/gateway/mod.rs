//! WebSocket gateway: the producer/consumer event surface.
//!
//! One socket per client. Outbound events flow through an unbounded
//! channel drained by a writer task, which is also the sink the room
//! registry publishes into — a slow subscriber only backs up its own
//! channel.

pub mod events;

use crate::orchestrator::SessionOrchestrator;
use crate::rooms::RoomRegistry;
use crate::segment::TranscriptView;
use crate::store::{DurableStore, TranscriptStore};
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use events::{ClientEvent, ServerEvent, SyncData};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared state behind every gateway connection.
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub rooms: Arc<RoomRegistry<ServerEvent>>,
    pub transcripts: Arc<TranscriptStore>,
    pub durable: Arc<dyn DurableStore>,
    pub admin_secret: Option<String>,
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/download/{sid}", get(download))
        .route("/health", get(health))
        .with_state(state)
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
) -> axum::Json<TranscriptView> {
    axum::Json(state.transcripts.get(&sid).await)
}

async fn health() -> &'static str {
    "ok"
}

/// Per-connection session state.
#[derive(Default)]
struct ConnState {
    verified: bool,
    secret_key: Option<String>,
    session_id: Option<String>,
    /// Whether this connection started the realtime producer path.
    streaming: bool,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    // Outbound lane: room publishes and replies both land here.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnState::default();
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_event(&state, &mut conn, &client_id, &out_tx, &text).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // Disconnect: drop every room membership; a streaming producer takes
    // its upstream STT session down with it.
    state.rooms.leave_all(&client_id);
    if conn.streaming {
        if let Some(sid) = &conn.session_id {
            state.orchestrator.stop_stt(sid);
        }
    }
    writer.abort();
    debug!("client disconnected: {client_id}");
}

async fn handle_event(
    state: &Arc<AppState>,
    conn: &mut ConnState,
    client_id: &str,
    out_tx: &mpsc::UnboundedSender<ServerEvent>,
    raw: &str,
) {
    let event = match ClientEvent::parse(raw) {
        Ok(Some(event)) => event,
        Ok(None) => {
            let _ = out_tx.send(ServerEvent::error("Unknown event"));
            return;
        }
        Err(e) => {
            warn!("malformed frame from {client_id}: {e}");
            let _ = out_tx.send(ServerEvent::error("Malformed event"));
            return;
        }
    };

    match event {
        ClientEvent::Connect { secret_key } => {
            conn.verified = match (&state.admin_secret, &secret_key) {
                (Some(admin), Some(given)) => admin == given,
                _ => false,
            };
            if conn.verified {
                info!("admin client connected: {client_id}");
            } else {
                info!("client connected: {client_id}");
            }
            let _ = out_tx.send(ServerEvent::Connected {
                status: "connected".to_owned(),
                client_id: client_id.to_owned(),
            });
        }

        ClientEvent::JoinSession {
            session_id,
            secret_key,
        } => {
            let Some(session_id) = session_id else {
                let _ = out_tx.send(ServerEvent::error("Session ID is required"));
                return;
            };
            if let Some(secret) = secret_key {
                match state.durable.find_room(&session_id).await {
                    Ok(Some(room)) if room.secret_key == secret => {
                        conn.verified = true;
                        conn.secret_key = Some(secret);
                        info!("client verified for {session_id}");
                    }
                    Ok(_) => {}
                    Err(e) => warn!("room lookup failed for {session_id}: {e}"),
                }
            }
            state.rooms.enter(&session_id, client_id, out_tx.clone());
            conn.session_id = Some(session_id.clone());
            let _ = out_tx.send(ServerEvent::JoinedSession { session_id });
        }

        ClientEvent::LeaveSession { session_id } => {
            let Some(session_id) = session_id else {
                let _ = out_tx.send(ServerEvent::error("Session ID is required"));
                return;
            };
            state.rooms.leave(&session_id, client_id);
            info!("client left session: {session_id}");
            let _ = out_tx.send(ServerEvent::LeftSession { session_id });
        }

        ClientEvent::Sync(sync) => {
            if !sync_authorized(conn, &sync) {
                let _ = out_tx.send(ServerEvent::error("Unauthorized"));
                return;
            }
            let Some(sid) = sync.id.clone() else {
                let _ = out_tx.send(ServerEvent::error("Session ID is required"));
                return;
            };
            state.orchestrator.process_update(&sid, sync.segment()).await;
        }

        ClientEvent::RealtimeConnect => {
            if !conn.verified {
                let _ = out_tx.send(ServerEvent::error("Unauthorized"));
                return;
            }
            let Some(sid) = &conn.session_id else {
                let _ = out_tx.send(ServerEvent::error("Join a session first"));
                return;
            };
            conn.streaming = true;
            state.orchestrator.ensure_producer(sid);
        }

        ClientEvent::AudioBufferAppend { audio } => {
            if !conn.verified {
                let _ = out_tx.send(ServerEvent::error("Unauthorized"));
                return;
            }
            let Some(sid) = conn.session_id.clone() else {
                let _ = out_tx.send(ServerEvent::error("Join a session first"));
                return;
            };
            let Some(audio) = audio else {
                let _ = out_tx.send(ServerEvent::error("Audio payload is required"));
                return;
            };
            // Garbage is cheaper to reject here than after the upstream
            // socket round-trip.
            if base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &audio).is_err() {
                let _ = out_tx.send(ServerEvent::error("Audio payload is not valid base64"));
                return;
            }
            conn.streaming = true;
            state.orchestrator.push_audio(&sid, audio);
        }
    }
}

/// Legacy producers prove either the admin secret (connection-level
/// `verified`) or the room secret remembered from `join_session`.
fn sync_authorized(conn: &ConnState, sync: &SyncData) -> bool {
    if conn.verified {
        return true;
    }
    match (&conn.secret_key, &sync.secret_key) {
        (Some(remembered), Some(given)) => remembered == given,
        _ => false,
    }
}
