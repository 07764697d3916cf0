//! `/notify`: one JSON message per accepted lap.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use super::send_json;
use crate::ShutdownReceiver;
use crate::hub::HubHandle;

pub(super) async fn serve(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    hub: HubHandle,
    mut shutdown: ShutdownReceiver,
) {
    let Some(mut sub) = hub.subscribe().await else {
        warn!("[gateway] hub stopped, refusing display {peer}");
        return;
    };
    let id = sub.id();
    info!("[gateway] display {peer} connected as subscriber {id}");
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws_write.close().await;
                break;
            }
            notif = sub.recv() => match notif {
                Some(notif) => {
                    if let Err(e) = send_json(&mut ws_write, &*notif).await {
                        warn!("[gateway] display {peer}: {e}");
                        break;
                    }
                }
                None => {
                    info!("[gateway] subscriber {id} dropped by hub");
                    let _ = ws_write.close().await;
                    break;
                }
            },
            // Displays send nothing useful; reading detects a closed socket.
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    hub.unsubscribe(id).await;
    info!("[gateway] display {peer} disconnected");
}
