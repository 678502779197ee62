use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::outbound::dialer::dial_direct;
use crate::protocol::{Address, RequestHeader};
use crate::utils::error::Result;

/// Which dial of the session this is. A session makes at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Primary,
    Retry,
}

/// Route taken by the retry dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryRoute {
    /// Tunnel to the original destination through the configured SOCKS5 proxy.
    Socks5,
    /// Dial the configured fallback hop directly.
    Fallback { host: String, port: u16 },
    /// No fallback configured; dial the original destination again.
    Original,
}

/// Opens outbound streams for TCP sessions and writes the initial payload.
///
/// The primary dial goes to the requested destination, through the SOCKS5
/// proxy when `socks5_relay_all` is set. The retry dial, taken only after a
/// primary that never produced a byte, prefers the SOCKS5 proxy when one is
/// configured and the fallback hop otherwise.
pub struct Dispatcher {
    config: Arc<UpstreamConfig>,
}

impl Dispatcher {
    pub fn new(config: Arc<UpstreamConfig>) -> Self {
        Self { config }
    }

    pub async fn open(&self, attempt: Attempt, header: &RequestHeader) -> Result<TcpStream> {
        let mut stream = match attempt {
            Attempt::Primary => {
                if self.config.socks5_relay_all {
                    let socks5 = self
                        .config
                        .socks5
                        .as_ref()
                        .expect("validated at startup: relay-all requires a SOCKS5 endpoint");
                    socks5.dial(&header.address, header.port).await?
                } else {
                    dial_direct(&header.address, header.port).await?
                }
            }
            Attempt::Retry => match self.retry_route(header) {
                RetryRoute::Socks5 => {
                    let socks5 = self.config.socks5.as_ref().expect("route implies endpoint");
                    socks5.dial(&header.address, header.port).await?
                }
                RetryRoute::Fallback { host, port } => {
                    debug!(fallback = %format!("{host}:{port}"), "retrying through fallback hop");
                    dial_direct(&Address::Domain(host), port).await?
                }
                RetryRoute::Original => dial_direct(&header.address, header.port).await?,
            },
        };

        if !header.payload.is_empty() {
            stream.write_all(&header.payload).await?;
        }

        Ok(stream)
    }

    /// A configured fallback port overrides the destination port; a bare
    /// fallback host keeps it.
    fn retry_route(&self, header: &RequestHeader) -> RetryRoute {
        if self.config.socks5.is_some() {
            return RetryRoute::Socks5;
        }
        match &self.config.fallback {
            Some(fallback) => RetryRoute::Fallback {
                host: fallback.host.clone(),
                port: fallback.port.unwrap_or(header.port),
            },
            None => RetryRoute::Original,
        }
    }
}
