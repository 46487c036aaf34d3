use crate::router;
use crate::state::AppState;
use anyhow::Context;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tablelog_core::ipc::{TablelogRequest, TablelogResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, FramedRead, FramedWrite, LengthDelimitedCodec};

// 4-byte little-endian length prefix + MessagePack payload
fn le_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

pub async fn run_unix_server(
    socket_path: &str,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let state = state.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    let mut framed_read = FramedRead::new(read, le_codec());
                    let mut framed_write = FramedWrite::new(write, le_codec());

                    while let Some(frame) = framed_read.next().await {
                        match frame {
                            Ok(bytes_mut) => {
                                let response = match rmp_serde::from_slice::<TablelogRequest>(&bytes_mut) {
                                    Ok(request) => router::handle_request(request, &state).await,
                                    Err(e) => TablelogResponse::err(format!("Deserialization error: {}", e)),
                                };
                                match rmp_serde::to_vec_named(&response) {
                                    Ok(resp_bytes) => {
                                        if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                                            tracing::error!("Failed to send response: {}", e);
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::error!("Failed to serialize response: {}", e);
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Frame error: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

/// One request/response round trip against a running server's socket.
pub async fn send_request(
    socket_path: &str,
    request: &TablelogRequest,
) -> anyhow::Result<TablelogResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path))?;
    let mut framed = Framed::new(stream, le_codec());

    framed
        .send(Bytes::from(rmp_serde::to_vec_named(request)?))
        .await?;
    let frame = framed
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("connection closed before response"))??;
    Ok(rmp_serde::from_slice(&frame)?)
}
