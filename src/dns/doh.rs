use axum::extract::ws::{Message, WebSocket};
use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::splitter::PacketSplitter;
use crate::utils::error::{GatewayError, Result};

const DNS_MESSAGE: &str = "application/dns-message";

/// Totals for the session summary log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsOutcome {
    pub queries: u64,
    pub replies: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

/// DNS-over-HTTPS client (RFC 8484, POST binding) plus the UDP-over-VLESS
/// relay loop that feeds it.
#[derive(Debug, Clone)]
pub struct DohClient {
    client: reqwest::Client,
    url: String,
}

impl DohClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build DoH client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// POST one DNS query in wire format and return the reply bytes.
    pub async fn query(&self, packet: Bytes) -> Result<Bytes> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(packet)
            .send()
            .await
            .map_err(|e| GatewayError::Doh(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Doh(format!(
                "resolver returned status {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| GatewayError::Doh(e.to_string()))
    }

    /// Relay length-prefixed DNS queries from the WebSocket to the resolver
    /// until the client goes away.
    ///
    /// Queries are dispatched one at a time in arrival order. Each reply is
    /// re-framed with its own 16-bit big-endian length and sent as a single
    /// binary frame; the first reply carries the two-byte response header.
    /// A failed query is logged and skipped, the session continues.
    pub async fn relay(
        &self,
        first_payload: Bytes,
        ws_tx: &mut SplitSink<WebSocket, Message>,
        ws_rx: &mut SplitStream<WebSocket>,
        response_header: &mut Option<[u8; 2]>,
        cancel: &CancellationToken,
    ) -> Result<DnsOutcome> {
        let mut splitter = PacketSplitter::new();
        splitter.push(&first_payload);
        let mut outcome = DnsOutcome::default();

        loop {
            while let Some(query) = splitter.next_packet() {
                outcome.queries += 1;
                outcome.bytes_up += query.len() as u64;
                let reply = match self.query(query).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(error = %e, "DNS query failed, skipping");
                        continue;
                    }
                };
                if reply.len() > u16::MAX as usize {
                    warn!(len = reply.len(), "oversized DNS reply, skipping");
                    continue;
                }

                let header = response_header.take();
                let mut frame =
                    BytesMut::with_capacity(header.map_or(0, |h| h.len()) + 2 + reply.len());
                if let Some(header) = header {
                    frame.extend_from_slice(&header);
                }
                frame.extend_from_slice(&(reply.len() as u16).to_be_bytes());
                frame.extend_from_slice(&reply);

                ws_tx.send(Message::Binary(frame.freeze())).await?;
                outcome.replies += 1;
                outcome.bytes_down += reply.len() as u64;
                trace!(replies = outcome.replies, "DNS reply relayed");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("DNS relay cancelled by shutdown");
                    return Ok(outcome);
                }
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Binary(data))) => splitter.push(&data),
                    Some(Ok(Message::Text(text))) => splitter.push(text.as_bytes()),
                    Some(Ok(Message::Close(_))) | None => return Ok(outcome),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}
