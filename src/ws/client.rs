use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{MessageType, Role, WsMessage};
use crate::routes::auth_middleware::CurrentUser;
use crate::state::AppState;
use crate::ws::hub::{Connection, HubHandle, OUTBOUND_CAPACITY};

/// Server ping cadence; a dead transport is detected by the next failed write.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(rename = "docId")]
    doc_id: String,
}

/// Identity resolved at the handshake and fixed for the life of the socket.
/// A role change made through the REST layer takes effect on reconnect.
pub struct ClientSession {
    pub conn_id: Uuid,
    pub doc_id: String,
    pub user_id: String,
    pub role: Role,
    pub title: String,
}

/// Socket endpoint: `GET /ws?docId=...&token=...`.
///
/// The auth middleware has already resolved the user. Admission runs before
/// the upgrade: an unknown document refuses the connection and nothing is
/// ever registered with the hub.
pub async fn serve_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    Extension(user): Extension<CurrentUser>,
    State(state): State<AppState>,
) -> Response {
    if query.doc_id.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let doc_id = query.doc_id;

    let (owner_id, title) = match state.store.read_owner_and_title(&doc_id).await {
        Ok(Some(pair)) => pair,
        Ok(None) => {
            warn!(%doc_id, "connection rejected: document not found");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            error!(%doc_id, error = %e, "database error checking document");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let role = if owner_id == user.uid {
        Role::Writer
    } else {
        match state.store.collaborator_role(&doc_id, &user.uid).await {
            Ok(Some(role)) => role,
            Ok(None) => Role::Reader,
            Err(e) => {
                error!(%doc_id, user_id = %user.uid, error = %e, "database error resolving role");
                Role::Reader
            }
        }
    };

    let session = ClientSession {
        conn_id: Uuid::new_v4(),
        doc_id,
        user_id: user.uid,
        role,
        title,
    };
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| run_client(socket, hub, session))
}

/// Drive one live socket: register with the hub, run both pumps, and
/// unregister when the connection is done. The read side is the unique
/// owner of the unregister event for this connection.
pub async fn run_client(socket: WebSocket, hub: HubHandle, session: ClientSession) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (sink, stream) = socket.split();

    hub.register(Connection {
        conn_id: session.conn_id,
        doc_id: session.doc_id.clone(),
        user_id: session.user_id.clone(),
        title: session.title.clone(),
        sender: outbound_tx,
    });

    let mut writer = tokio::spawn(write_pump(sink, outbound_rx));
    tokio::select! {
        _ = read_pump(stream, &hub, &session) => {}
        // The write pump exiting first means the hub closed the queue or a
        // write failed; tear down the read side too instead of waiting on a
        // peer that may never speak again.
        _ = &mut writer => {}
    }

    hub.unregister(&session.doc_id, session.conn_id);
}

async fn read_pump(mut stream: SplitStream<WebSocket>, hub: &HubHandle, session: &ClientSession) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(user_id = %session.user_id, error = %e, "websocket read failed");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                // One malformed message must not close the session.
                let mut msg: WsMessage = match serde_json::from_str(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(user_id = %session.user_id, error = %e, "dropping malformed frame");
                        continue;
                    }
                };

                // Overwrite with server-authoritative identity so a client
                // cannot speak on behalf of another user or document.
                msg.document_id = session.doc_id.clone();
                msg.user_id = session.user_id.clone();

                match msg.kind {
                    MessageType::Update => {
                        if !session.role.can_edit() {
                            warn!(
                                user_id = %session.user_id,
                                role = %session.role,
                                doc_id = %session.doc_id,
                                "permission denied: UPDATE requires the writer role"
                            );
                            continue;
                        }
                    }
                    MessageType::Cursor => {}
                    // Comments travel through the REST layer; everything
                    // else is server-originated. Ignore them from clients.
                    _ => continue,
                }

                hub.broadcast(msg);
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

async fn write_pump(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<String>) {
    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            debug!(error = %e, "websocket write failed");
                            return;
                        }
                    }
                    // Queue closed by the hub after removal: clean shutdown.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    debug!(error = %e, "keepalive ping failed");
                    return;
                }
            }
        }
    }
}
