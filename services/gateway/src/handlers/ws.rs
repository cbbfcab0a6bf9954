use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use market::MarketEvent;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, warn};
use types::ids::UserId;

/// Live feed of committed market events as JSON text frames
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::WebSocket)?;

    let events = state.market.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, events, user.user_id)))
}

async fn handle_socket(socket: WebSocket, mut events: Receiver<MarketEvent>, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    debug!(%user_id, "Market feed connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "Failed to encode market event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(Utf8Bytes::from(text))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%user_id, skipped, "Market feed subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(%user_id, "Market feed disconnected");
}
