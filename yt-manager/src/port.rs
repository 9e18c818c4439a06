use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use yt_manager_core::port::{Command, Diagnostic, ErrorKind, Event};

use crate::AppState;

pub async fn port_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One connection is one UI port. Commands run concurrently and each event
/// is sent as soon as it is ready.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let connection_id = Uuid::new_v4();
    debug!(%connection_id, "port connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "dropping unencodable event");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<Command>(text.as_str()) {
                Ok(command) => {
                    let facade = state.facade.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(facade.handle(command).await);
                    });
                }
                Err(e) => {
                    let _ = tx.send(Event::CommandError(Diagnostic::new(
                        ErrorKind::BadRequest,
                        e.to_string(),
                    )));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Let in-flight commands deliver before the socket goes away.
    drop(tx);
    if tokio::time::timeout(std::time::Duration::from_secs(5), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    debug!(%connection_id, "port disconnected");
}
