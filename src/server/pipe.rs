use axum::extract::ws::{Message, WebSocket};
use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::utils::error::Result;

const BUFFER_SIZE: usize = 32 * 1024;

/// How a pipe run ended. Only the remote-side endings can make a session
/// eligible for the one retry dial.
#[derive(Debug)]
pub enum PipeEnd {
    RemoteClosed,
    RemoteError(std::io::Error),
    ClientClosed,
    Cancelled,
}

#[derive(Debug)]
pub struct PipeOutcome {
    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
    pub ended: PipeEnd,
}

impl PipeOutcome {
    /// True when the remote went away before delivering a single byte.
    pub fn retry_eligible(&self) -> bool {
        self.downstream_bytes == 0
            && matches!(self.ended, PipeEnd::RemoteClosed | PipeEnd::RemoteError(_))
    }
}

/// Full-duplex copy between the bound remote stream and the WebSocket.
///
/// Client bytes reach the remote in arrival order; remote bytes reach the
/// client in arrival order, with the two-byte response header taken from its
/// one-shot slot and prepended to the first downstream frame only. Both
/// directions run interleaved in a single task, so back-pressure on either
/// writer pauses the matching reader.
///
/// An `Err` return means the WebSocket transport itself failed; `Ok` carries
/// how the run ended so the caller can decide on the retry dial.
pub async fn run_pipe(
    remote: &mut TcpStream,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    response_header: &mut Option<[u8; 2]>,
    cancel: &CancellationToken,
) -> Result<PipeOutcome> {
    let (mut remote_read, mut remote_write) = remote.split();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut upstream_bytes = 0u64;
    let mut downstream_bytes = 0u64;

    let ended = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = remote_write.shutdown().await;
                break PipeEnd::Cancelled;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = remote_write.write_all(&data).await {
                        break PipeEnd::RemoteError(e);
                    }
                    upstream_bytes += data.len() as u64;
                }
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = remote_write.write_all(text.as_bytes()).await {
                        break PipeEnd::RemoteError(e);
                    }
                    upstream_bytes += text.as_bytes().len() as u64;
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = remote_write.shutdown().await;
                    break PipeEnd::ClientClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            read = remote_read.read(&mut buf) => match read {
                Ok(0) => break PipeEnd::RemoteClosed,
                Ok(n) => {
                    let frame = match response_header.take() {
                        Some(header) => {
                            let mut framed = BytesMut::with_capacity(header.len() + n);
                            framed.extend_from_slice(&header);
                            framed.extend_from_slice(&buf[..n]);
                            framed.freeze()
                        }
                        None => Bytes::copy_from_slice(&buf[..n]),
                    };
                    // a send failure means the socket left the OPEN state
                    ws_tx.send(Message::Binary(frame)).await?;
                    downstream_bytes += n as u64;
                    trace!(bytes = n, "downstream chunk relayed");
                }
                Err(e) => break PipeEnd::RemoteError(e),
            },
        }
    };

    Ok(PipeOutcome {
        upstream_bytes,
        downstream_bytes,
        ended,
    })
}

/// Close the client side without ever raising: close-time failures mean the
/// socket is already gone.
pub async fn safe_close_ws(ws_tx: &mut SplitSink<WebSocket, Message>) {
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.flush().await;
}
