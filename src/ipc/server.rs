//! TCP IPC server: accept loop and per-connection handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::hub::ToolHub;
use crate::ipc::codec::{encode_msgpack, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use crate::ipc::router;
use crate::types::{IpcConfig, RequestContext};

/// IPC server wrapping the hub.
#[derive(Debug)]
pub struct IpcServer {
    hub: Arc<ToolHub>,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(hub: Arc<ToolHub>, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            hub,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Token cancelled on shutdown; in-flight invocations observe it too.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the server until cancelled or a fatal error occurs.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener).await
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            "IPC server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.ipc_config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    // Acquire connection permit (backpressure when at capacity).
                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.ipc_config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!("IPC connection from {} (active={})",
                        peer,
                        self.ipc_config.max_connections - conn_semaphore.available_permits(),
                    );
                    let hub = Arc::clone(&self.hub);
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, hub, cancel, ipc_config, permit).await {
                            tracing::warn!("Connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn error_payload(id: &str, code: &str, message: String, status: u16) -> Value {
    serde_json::json!({
        "id": id,
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "status": status,
        }
    })
}

/// Handle a single TCP connection: read frames → route → write responses.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    hub: Arc<ToolHub>,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let read_timeout = Duration::from_secs(ipc_config.read_timeout_secs);
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame_result = tokio::time::timeout(read_timeout, read_frame(&mut reader, ipc_config.max_frame_bytes)) => {
                let frame = match frame_result {
                    Err(_elapsed) => {
                        tracing::debug!("Read timeout ({}s), dropping connection", ipc_config.read_timeout_secs);
                        break;
                    }
                    Ok(result) => match result? {
                        Some(f) => f,
                        None => break, // clean EOF
                    },
                };

                if frame.msg_type != MSG_REQUEST {
                    let err_payload = error_payload(
                        "",
                        "INVALID_ARGUMENT",
                        format!("Unexpected message type: 0x{:02X}", frame.msg_type),
                        400,
                    );
                    let encoded = encode_msgpack(&err_payload)?;
                    timed_write(&mut writer, MSG_ERROR, &encoded, write_timeout).await?;
                    continue;
                }

                let request: Value = match rmp_serde::from_slice(&frame.payload) {
                    Ok(v) => v,
                    Err(e) => {
                        let err_payload = error_payload(
                            "",
                            "INVALID_ARGUMENT",
                            format!("Invalid msgpack: {}", e),
                            400,
                        );
                        let encoded = encode_msgpack(&err_payload)?;
                        timed_write(&mut writer, MSG_ERROR, &encoded, write_timeout).await?;
                        continue;
                    }
                };

                let request_id = request.get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let service = request.get("service")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let method = request.get("method")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let body = request.get("body")
                    .cloned()
                    .unwrap_or(Value::Object(serde_json::Map::new()));

                // Shutdown cancels in-flight invocations along with the connection.
                let ctx = RequestContext::with_token(cancel.child_token());
                let route = router::route_request(&hub, &ctx, service, method, body);
                tokio::pin!(route);
                let mut client_gone = false;
                let result = tokio::select! {
                    result = &mut route => result,
                    _ = disconnected(&mut reader) => {
                        tracing::debug!(%service, %method, "client disconnected, cancelling request");
                        ctx.cancel();
                        client_gone = true;
                        route.await
                    }
                };
                if client_gone {
                    if let Err(e) = result {
                        tracing::debug!(%service, %method, error = %e, "abandoned request failed");
                    }
                    break;
                }

                let (msg_type, response) = match result {
                    Ok(response_body) => (
                        MSG_RESPONSE,
                        serde_json::json!({
                            "id": request_id,
                            "ok": true,
                            "body": response_body,
                        }),
                    ),
                    Err(e) => {
                        tracing::debug!(%service, %method, error = %e, "request failed");
                        (
                            MSG_ERROR,
                            error_payload(&request_id, e.to_ipc_error_code(), e.to_string(), e.status_code()),
                        )
                    }
                };
                let encoded = encode_msgpack(&response)?;
                timed_write(&mut writer, msg_type, &encoded, write_timeout).await?;
            }
        }
    }

    Ok(())
}

/// Resolves once the peer closes its side of the connection.
///
/// Peeks without consuming, so a pipelined next frame stays buffered; once
/// data is waiting the watch parks until the current request completes.
async fn disconnected(reader: &mut OwnedReadHalf) {
    let mut buf = [0u8; 1];
    match reader.peek(&mut buf).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending::<()>().await,
    }
}

/// Write a frame with a timeout. Returns an error if the write takes too long
/// (prevents slow consumers from holding connections indefinitely).
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({}s), dropping connection", timeout.as_secs());
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
