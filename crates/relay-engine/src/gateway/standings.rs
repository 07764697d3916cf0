//! `/standings`: the full standings on connect and after every change.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use relay_core::types::Standings;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use super::send_json;
use crate::ShutdownReceiver;

pub(super) async fn serve(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    mut standings: watch::Receiver<Arc<Standings>>,
    mut shutdown: ShutdownReceiver,
) {
    info!("[gateway] scoreboard {peer} connected");
    let (mut ws_write, mut ws_read) = ws.split();

    let current = standings.borrow_and_update().clone();
    if let Err(e) = send_json(&mut ws_write, &*current).await {
        warn!("[gateway] scoreboard {peer}: {e}");
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws_write.close().await;
                break;
            }
            changed = standings.changed() => {
                if changed.is_err() {
                    let _ = ws_write.close().await;
                    break;
                }
                // Intermediate snapshots may be skipped; the latest is complete.
                let latest = standings.borrow_and_update().clone();
                if let Err(e) = send_json(&mut ws_write, &*latest).await {
                    warn!("[gateway] scoreboard {peer}: {e}");
                    break;
                }
            }
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    info!("[gateway] scoreboard {peer} disconnected");
}
