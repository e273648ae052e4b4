use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info, warn};

use crate::{middleware::auth::authenticate_token, models::auth::AuthenticatedUser, AppState};

#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    pub token: String,
}

/// GET /ws/session?token= — streams the caller's session state (user, school,
/// loading flag) as it changes. Sending `sign_out` ends the session.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
) -> Response {
    let auth_user = authenticate_token(&state, &params.token).await;

    ws.on_upgrade(move |socket| async move {
        match auth_user {
            Ok(user) => {
                info!("Session socket connected: user={}", user.user_id);
                handle_socket(socket, state, user).await;
            }
            Err((_, reason)) => {
                error!("Session socket auth failed: {reason}");
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let ctx = Arc::new(state.session());
    ctx.attach(user.user_id, user.session_id);

    let (mut sender, mut receiver) = socket.split();
    let mut updates = WatchStream::new(ctx.subscribe());

    // Session state → WebSocket
    let mut push_task = tokio::spawn(async move {
        while let Some(snapshot) = updates.next().await {
            let msg = serde_json::json!({ "type": "session", "payload": snapshot });
            if sender.send(Message::Text(msg.to_string().into())).await.is_err() {
                break;
            }
        }
    });

    let client_ctx = ctx.clone();
    let mut client_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) if text.as_str().trim() == "sign_out" => {
                    if let Err(e) = client_ctx.sign_out().await {
                        warn!("Sign-out over socket failed: {e}");
                    }
                    break;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut push_task) => client_task.abort(),
        _ = (&mut client_task) => push_task.abort(),
    }

    info!("Session socket disconnected: user={}", user.user_id);
}
