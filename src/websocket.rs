use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use crate::hub::{BroadcastHub, Subscription};
use crate::state::AppState;

/// Handle WebSocket upgrade for monitor clients
pub async fn handle_monitor(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state.hub))
}

/// Push hub messages to one monitor until either side goes away
async fn handle_socket(socket: WebSocket, hub: BroadcastHub) {
    let (mut sender, mut receiver) = socket.split();

    // The upgrade is the handshake; register only once it has completed
    let Subscription {
        handle,
        receiver: mut outbound,
    } = match hub.connect() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Rejecting monitor connection: {}", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("Monitor {} attached", handle.id());

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = sender.send(Message::Text(payload.to_string().into())).await {
                    warn!("Failed to deliver to monitor {}: {}", handle.id(), e);
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket connection closed by client");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    // Clients may send keep-alive text; nothing to do
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(&handle);
    info!("WebSocket connection terminated");
}
