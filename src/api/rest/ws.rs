use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::error::AppError;
use crate::integrations::events::Topic;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Comma separated, e.g. `order:1,user:7`. Absent or empty means every topic.
    pub topics: Option<String>,
}

fn parse_topics(raw: Option<&str>) -> Result<HashSet<Topic>, AppError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(|topic| topic.parse::<Topic>().map_err(AppError::Validation))
        .collect()
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let topics = parse_topics(query.topics.as_deref())?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, topics)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, topics: HashSet<Topic>) {
    let (mut sender, mut receiver) = socket.split();
    let events = BroadcastStream::new(state.events_tx.subscribe()).filter_map(|result| {
        let topics = &topics;
        let envelope = match result {
            Ok(envelope) if topics.is_empty() || topics.contains(&envelope.topic) => Some(envelope),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "websocket subscriber lagged behind");
                None
            }
        };
        futures::future::ready(envelope)
    });
    futures::pin_mut!(events);

    info!(topics = topics.len(), "websocket client connected");

    let send_task = async {
        while let Some(envelope) = events.next().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let recv_task = async {
        while let Some(Ok(_msg)) = receiver.next().await {}
    };

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
