//! `/laps`: tag reads from field readers.
//!
//! A reader that lost its connection buffers reads and sends them in one
//! frame when it reconnects, so a text frame holds one or more tag ids
//! separated by commas.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use relay_core::types::TagId;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::ShutdownReceiver;

/// Split a frame into tag ids, in order. Empty pieces are skipped; pieces
/// that are not ids come back as `Err` with the offending text.
pub fn parse_tag_frame(frame: &str) -> impl Iterator<Item = Result<TagId, &str>> + '_ {
    frame
        .split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| piece.parse::<TagId>().map_err(|_| piece))
}

pub(super) async fn serve(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    intake: mpsc::Sender<TagId>,
    mut shutdown: ShutdownReceiver,
) {
    info!("[gateway] reader {peer} connected");
    let (mut ws_write, mut ws_read) = ws.split();
    let mut reads = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws_write.close().await;
                break;
            }
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    for parsed in parse_tag_frame(&text) {
                        match parsed {
                            // Backpressure: wait for room rather than drop reads.
                            Ok(tag_id) => {
                                if intake.send(tag_id).await.is_err() {
                                    warn!("[gateway] intake closed, dropping reader {peer}");
                                    return;
                                }
                                reads += 1;
                            }
                            Err(bad) => warn!("[gateway] {peer} sent bad tag id {bad:?}, ignored"),
                        }
                    }
                    debug!("[gateway] {peer} frame handled ({reads} read(s) so far)");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    error!("[gateway] read error from {peer}: {e}");
                    break;
                }
                _ => {}
            },
        }
    }

    info!("[gateway] reader {peer} disconnected after {reads} read(s)");
}
