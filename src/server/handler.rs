use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::UpstreamConfig;
use crate::dns::DohClient;
use crate::outbound::{Attempt, Dispatcher};
use crate::protocol::{build_response, decode_early_data, parse_request, Command, RequestHeader};
use crate::server::pipe::{run_pipe, safe_close_ws, PipeEnd};
use crate::session::{Mode, SessionManager, SessionRecord, SessionStatus};
use crate::utils::error::Result;

/// Shared state for every accepted connection.
pub struct GatewayContext {
    pub upstream: Arc<UpstreamConfig>,
    pub sessions: Arc<SessionManager>,
    pub doh: DohClient,
    pub shutdown: CancellationToken,
}

/// Axum handler for the WebSocket route. The `Sec-WebSocket-Protocol`
/// request header is captured before the upgrade because it may carry the
/// base64 early-data blob.
pub async fn ws_upgrade(
    State(ctx): State<Arc<GatewayContext>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let early_header = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // Early-data clients expect their subprotocol accepted in the response.
    let ws = if early_header.is_empty() {
        ws
    } else {
        ws.protocols([early_header.clone()])
    };

    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_session(socket, ctx, early_header).await {
            warn!(error = %e, "session terminated");
        }
    })
}

/// Per-connection lifecycle: decode early data, parse the request header off
/// the first chunk, authenticate, then branch into the TCP pipe or the DNS
/// relay. No error detail is ever sent to the client; it only observes the
/// transport close.
async fn handle_session(
    socket: WebSocket,
    ctx: Arc<GatewayContext>,
    early_header: String,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let early = match decode_early_data(&early_header) {
        Ok(bytes) => bytes,
        Err(e) => {
            safe_close_ws(&mut ws_tx).await;
            return Err(e);
        }
    };

    // Early data is the first ingress chunk when present. The header is
    // parsed exactly once; a first chunk below the minimum header length is
    // a hard error, no cross-chunk reassembly.
    let first_chunk = if !early.is_empty() {
        early
    } else {
        match next_data_chunk(&mut ws_rx).await? {
            Some(chunk) => chunk,
            None => return Ok(()), // client went away before sending anything
        }
    };

    let header = match parse_request(first_chunk, &ctx.upstream.user_ids) {
        Ok(header) => header,
        Err(e) => {
            safe_close_ws(&mut ws_tx).await;
            return Err(e);
        }
    };

    let mode = match header.command {
        Command::Tcp => Mode::Tcp,
        Command::Udp => Mode::Dns,
    };

    let record = SessionRecord::new(header.user_id, header.address.to_string(), header.port, mode);
    let session_id = record.session_id;
    let span = info_span!("session", prefix = %record.log_prefix());
    ctx.sessions.register(record);

    let result = drive_session(&ctx, header, mode, &mut ws_tx, &mut ws_rx)
        .instrument(span)
        .await;

    match &result {
        Ok((up, down)) => ctx
            .sessions
            .finish(&session_id, *up, *down, SessionStatus::Closed),
        Err(_) => ctx.sessions.finish(&session_id, 0, 0, SessionStatus::Failed),
    }

    result.map(|_| ())
}

async fn drive_session(
    ctx: &Arc<GatewayContext>,
    header: RequestHeader,
    mode: Mode,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<(u64, u64)> {
    // One-shot slot for the two-byte response header; taken by whichever
    // path delivers the first server-origin frame.
    let mut response_header = Some(build_response(header.version));

    match mode {
        Mode::Dns => {
            info!(dest = %header.destination(), "DNS-over-HTTPS session");
            let outcome = ctx
                .doh
                .relay(
                    header.payload.clone(),
                    ws_tx,
                    ws_rx,
                    &mut response_header,
                    &ctx.shutdown,
                )
                .await;
            safe_close_ws(ws_tx).await;
            if let Ok(o) = &outcome {
                debug!(queries = o.queries, replies = o.replies, "DNS relay finished");
            }
            outcome.map(|o| (o.bytes_up, o.bytes_down))
        }
        Mode::Tcp => {
            let dispatcher = Dispatcher::new(ctx.upstream.clone());
            let mut attempt = Attempt::Primary;
            let mut upstream_total = 0u64;
            let mut downstream_total = 0u64;

            loop {
                let mut remote = match dispatcher.open(attempt, &header).await {
                    Ok(stream) => stream,
                    Err(e) if attempt == Attempt::Primary => {
                        debug!(error = %e, "primary dial failed, taking retry path");
                        attempt = Attempt::Retry;
                        continue;
                    }
                    Err(e) => {
                        safe_close_ws(ws_tx).await;
                        return Err(e);
                    }
                };

                info!(dest = %header.destination(), attempt = ?attempt, "outbound stream bound");

                let outcome = match run_pipe(
                    &mut remote,
                    ws_tx,
                    ws_rx,
                    &mut response_header,
                    &ctx.shutdown,
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let _ = remote.shutdown().await;
                        return Err(e);
                    }
                };

                upstream_total += outcome.upstream_bytes;
                downstream_total += outcome.downstream_bytes;

                // The retry dial happens at most once, and only for a
                // primary that never delivered a byte downstream.
                if attempt == Attempt::Primary && outcome.retry_eligible() {
                    debug!("remote closed without data, retrying once");
                    attempt = Attempt::Retry;
                    continue;
                }

                if let PipeEnd::RemoteError(e) = &outcome.ended {
                    debug!(error = %e, "remote stream error");
                }

                safe_close_ws(ws_tx).await;
                return Ok((upstream_total, downstream_total));
            }
        }
    }
}

/// Await the next data-bearing frame, skipping control frames.
async fn next_data_chunk(ws_rx: &mut SplitStream<WebSocket>) -> Result<Option<Bytes>> {
    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
            Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text))),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
