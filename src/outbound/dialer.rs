use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{instrument, trace};

use crate::protocol::Address;
use crate::utils::error::{GatewayError, Result};

/// Outbound connect timeout, applied to direct and SOCKS5 dials alike.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve a VLESS address into a list of socket addresses, preferring IPv6
/// entries first while preserving order inside each category.
#[instrument(level = "debug", fields(port = port, address = %address))]
pub async fn resolve_address(address: &Address, port: u16) -> Result<Vec<SocketAddr>> {
    let mut targets = match address {
        Address::Ipv4(octets) => {
            let ip = IpAddr::V4(Ipv4Addr::from(*octets));
            vec![SocketAddr::new(ip, port)]
        }
        Address::Ipv6(octets) => {
            let ip = IpAddr::V6(Ipv6Addr::from(*octets));
            vec![SocketAddr::new(ip, port)]
        }
        Address::Domain(domain) => {
            let lookup = tokio::net::lookup_host((domain.as_str(), port))
                .await
                .map_err(GatewayError::Io)?;
            lookup.collect()
        }
    };

    targets.sort_by_key(|addr| match addr.ip() {
        IpAddr::V6(_) => 0,
        IpAddr::V4(_) => 1,
    });

    if targets.is_empty() {
        return Err(GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no addresses found for destination",
        )));
    }

    Ok(targets)
}

/// Open a direct TCP stream to the destination, trying each resolved address
/// in turn with a per-attempt connect timeout.
pub async fn dial_direct(address: &Address, port: u16) -> Result<TcpStream> {
    let targets = resolve_address(address, port).await?;

    let mut last_err: Option<std::io::Error> = None;
    for target in targets {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                trace!(target = %target, "outbound connected");
                return Ok(stream);
            }
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => {
                last_err = Some(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ));
            }
        }
    }

    Err(GatewayError::Dial {
        dest: format!("{address}:{port}"),
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no targets")
        }),
    })
}
