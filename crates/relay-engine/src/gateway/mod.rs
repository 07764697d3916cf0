//! Websocket gateways.
//!
//! One TCP listener serves every client. The request path, checked during
//! the websocket handshake, picks the adapter:
//!
//! - `/laps`: a field reader pushing tag reads into the intake queue
//! - `/notify`: a live display receiving one JSON message per lap
//! - `/standings`: a scoreboard receiving the full standings on every change
//!
//! Any other path is refused with HTTP 404. Pings are answered by
//! tungstenite itself while the adapter reads.

mod ingest;
mod notify;
mod standings;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use relay_core::error::RelayError;
use relay_core::types::{Standings, TagId};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::ShutdownReceiver;
use crate::hub::HubHandle;

pub use ingest::parse_tag_frame;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Endpoint selected by the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Laps,
    Notify,
    Standings,
}

impl Route {
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/laps" => Some(Route::Laps),
            "/notify" => Some(Route::Notify),
            "/standings" => Some(Route::Standings),
            _ => None,
        }
    }
}

/// Everything a connection task may need.
#[derive(Clone)]
pub struct GatewayContext {
    pub intake: mpsc::Sender<TagId>,
    pub hub: HubHandle,
    pub standings: watch::Receiver<Arc<Standings>>,
    pub shutdown: ShutdownReceiver,
}

pub struct GatewayServer {
    listener: TcpListener,
    ctx: GatewayContext,
}

impl GatewayServer {
    pub async fn bind(addr: SocketAddr, ctx: GatewayContext) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Gateway(format!("bind {addr}: {e}")))?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener
            .local_addr()
            .map_err(|e| RelayError::Gateway(e.to_string()))
    }

    /// Accept connections until shutdown. Each connection gets its own task.
    pub async fn run(self) {
        let Self { listener, ctx } = self;
        let mut shutdown = ctx.shutdown.clone();
        match listener.local_addr() {
            Ok(addr) => info!("[gateway] listening on ws://{addr}"),
            Err(e) => warn!("[gateway] listening (address unavailable: {e})"),
        }
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[gateway] shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(stream, peer, ctx.clone()));
                    }
                    Err(e) => error!("[gateway] accept failed: {e}"),
                },
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: GatewayContext) {
    let mut route = None;
    let handshake = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        let path = req.uri().path();
        match Route::from_path(path) {
            Some(r) => {
                route = Some(r);
                Ok(resp)
            }
            None => {
                warn!("[gateway] {peer} asked for unknown path {path}");
                Err(not_found(path))
            }
        }
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            debug!("[gateway] handshake with {peer} failed: {e}");
            return;
        }
    };
    let Some(route) = route else {
        return;
    };

    match route {
        Route::Laps => ingest::serve(ws, peer, ctx.intake, ctx.shutdown).await,
        Route::Notify => notify::serve(ws, peer, ctx.hub, ctx.shutdown).await,
        Route::Standings => standings::serve(ws, peer, ctx.standings, ctx.shutdown).await,
    }
}

fn not_found(path: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(format!("no endpoint at {path}")));
    *resp.status_mut() = StatusCode::NOT_FOUND;
    resp
}

/// Serialize `value` and send it as one text frame.
async fn send_json<T: Serialize>(sink: &mut WsSink, value: &T) -> Result<(), String> {
    let json = serde_json::to_string(value).map_err(|e| format!("encode: {e}"))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| format!("send: {e}"))
}
