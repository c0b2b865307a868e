//! WebSocket server for the broker daemon

use anyhow::{Context, Result};
use async_net::{TcpListener, TcpStream};
use async_tungstenite::accept_async;
use async_tungstenite::tungstenite::Message;
use futures::{FutureExt, SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};
use vm_broker::{CancellationToken, ServerApi};

use crate::handlers;
use crate::protocol::{Envelope, Reply, Response};

/// WebSocket front end of a broker
pub struct Server {
    listener: TcpListener,
    api: ServerApi,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(addr: &str, api: ServerApi, shutdown: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        Ok(Self {
            listener,
            api,
            shutdown,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections until the shutdown signal fires
    pub async fn run(self) -> Result<()> {
        info!("Broker daemon listening on ws://{}", self.local_addr()?);

        loop {
            let accepted = futures::select_biased! {
                _ = self.shutdown.cancelled().fuse() => break,
                accepted = self.listener.accept().fuse() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    let api = self.api.clone();
                    smol::spawn(async move {
                        if let Err(e) = handle_connection(stream, api).await {
                            error!("Connection handler error: {}", e);
                        }
                    })
                    .detach();
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        info!("Broker daemon stopped accepting connections");
        Ok(())
    }
}

/// Handle a WebSocket connection
///
/// Each request runs on its own task; replies are funnelled through a
/// single writer.
async fn handle_connection(stream: TcpStream, api: ServerApi) -> Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .context("Failed to accept WebSocket connection")?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (replies_tx, replies_rx) = async_channel::unbounded::<Reply>();

    let writer = smol::spawn(async move {
        while let Ok(reply) = replies_rx.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode reply: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                debug!("Reply writer stopped: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let envelope: Envelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Failed to parse request: {}", e);
                        let reply = Reply {
                            id: request_id(&text),
                            response: Response::invalid_request(format!(
                                "Invalid request format: {}",
                                e
                            )),
                        };
                        if replies_tx.send(reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let api = api.clone();
                let replies = replies_tx.clone();
                smol::spawn(async move {
                    let response = handlers::handle_request(envelope.request, &api).await;
                    let reply = Reply {
                        id: Some(envelope.id),
                        response,
                    };
                    if replies.send(reply).await.is_err() {
                        debug!("Connection closed before reply {} was sent", envelope.id);
                    }
                })
                .detach();
            }
            Ok(Message::Close(_)) => {
                debug!("Client requested close");
                break;
            }
            Ok(_) => {
                // Ignore other message types
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // the writer drains replies of requests still in flight
    drop(replies_tx);
    writer.detach();

    debug!("Connection closed");
    Ok(())
}

/// Best-effort extraction of the correlation id from a malformed frame
fn request_id(text: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64))
}
