//! SOCKS5 client (RFC 1928) with optional username/password authentication
//! (RFC 1929), used when the dispatcher tunnels through an upstream proxy.

use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::outbound::dialer::CONNECT_TIMEOUT;
use crate::protocol::Address;
use crate::utils::error::{GatewayError, Result, Socks5Error};

const SOCKS_VERSION: u8 = 0x05;

const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

/// SOCKS5 address types. Note the domain/IPv6 values differ from the VLESS
/// encoding and must be remapped when forwarding a decoded destination.
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

/// Upstream SOCKS5 proxy endpoint, parsed from `[user:pass@]host:port`.
#[derive(Debug, Clone)]
pub struct Socks5Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Socks5Endpoint {
    /// Connect to the proxy and tunnel a CONNECT to `(address, port)`.
    pub async fn dial(&self, address: &Address, port: u16) -> Result<TcpStream> {
        let mut stream = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| GatewayError::Dial {
            dest: format!("{}:{}", self.host, self.port),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|e| GatewayError::Dial {
            dest: format!("{}:{}", self.host, self.port),
            source: e,
        })?;

        stream.set_nodelay(true).ok();

        handshake(&mut stream, self, address, port).await?;

        debug!(
            proxy = %format!("{}:{}", self.host, self.port),
            dest = %format!("{address}:{port}"),
            "SOCKS5 tunnel established"
        );

        Ok(stream)
    }
}

/// Drive the full SOCKS5 client handshake on an established stream. Both
/// no-auth and username/password are always offered; if the server picks
/// user/pass without credentials configured, the dial fails.
pub async fn handshake<S>(
    stream: &mut S,
    endpoint: &Socks5Endpoint,
    address: &Address,
    port: u16,
) -> std::result::Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    stream
        .write_all(&[SOCKS_VERSION, 2, AUTH_NONE, AUTH_PASSWORD])
        .await?;
    stream.flush().await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;

    if choice[0] != SOCKS_VERSION {
        return Err(Socks5Error::VersionMismatch(choice[0]));
    }

    match choice[1] {
        AUTH_NONE => {
            trace!("proxy selected no-auth");
        }
        AUTH_PASSWORD => {
            let (username, password) = match (&endpoint.username, &endpoint.password) {
                (Some(u), Some(p)) => (u, p),
                _ => return Err(Socks5Error::CredentialsRequired),
            };
            authenticate(stream, username, password).await?;
        }
        AUTH_NO_ACCEPTABLE => return Err(Socks5Error::NoAcceptableMethod),
        other => {
            return Err(Socks5Error::Protocol(format!(
                "server selected unsupported method 0x{:02x}",
                other
            )));
        }
    }

    send_connect(stream, address, port).await?;
    read_connect_reply(stream).await
}

/// RFC 1929 username/password subnegotiation.
async fn authenticate<S>(
    stream: &mut S,
    username: &str,
    password: &str,
) -> std::result::Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if username.len() > 255 || password.len() > 255 {
        return Err(Socks5Error::Protocol(
            "username or password exceeds 255 bytes".to_string(),
        ));
    }

    let mut buf = SmallVec::<[u8; 64]>::new();
    buf.push(0x01);
    buf.push(username.len() as u8);
    buf.extend_from_slice(username.as_bytes());
    buf.push(password.len() as u8);
    buf.extend_from_slice(password.as_bytes());

    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;

    if response[1] != 0x00 {
        return Err(Socks5Error::AuthRejected);
    }

    trace!("proxy accepted credentials");
    Ok(())
}

/// Send the CONNECT request. The destination encoding mirrors the decoded
/// VLESS address type: raw IPv4/IPv6 octets or a length-prefixed domain.
async fn send_connect<S>(
    stream: &mut S,
    address: &Address,
    port: u16,
) -> std::result::Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut request = SmallVec::<[u8; 262]>::new();
    request.push(SOCKS_VERSION);
    request.push(CMD_CONNECT);
    request.push(0x00);

    match address {
        Address::Ipv4(octets) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(octets);
        }
        Address::Domain(domain) => {
            if domain.len() > 255 {
                return Err(Socks5Error::Protocol(format!(
                    "domain name too long: {} octets",
                    domain.len()
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(domain.len() as u8);
            request.extend_from_slice(domain.as_bytes());
        }
        Address::Ipv6(octets) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(octets);
        }
    }

    request.extend_from_slice(&port.to_be_bytes());

    stream.write_all(&request).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the CONNECT reply and skip the bound address.
async fn read_connect_reply<S>(stream: &mut S) -> std::result::Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;

    if reply[0] != SOCKS_VERSION {
        return Err(Socks5Error::VersionMismatch(reply[0]));
    }
    if reply[1] != REP_SUCCESS {
        return Err(Socks5Error::ConnectFailed(reply_error_message(reply[1])));
    }

    match reply[3] {
        ATYP_IPV4 => {
            let mut bound = [0u8; 4 + 2];
            stream.read_exact(&mut bound).await?;
        }
        ATYP_IPV6 => {
            let mut bound = [0u8; 16 + 2];
            stream.read_exact(&mut bound).await?;
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut bound = vec![0u8; len + 2];
            stream.read_exact(&mut bound).await?;
        }
        other => {
            return Err(Socks5Error::Protocol(format!(
                "invalid bound address type 0x{:02x} in reply",
                other
            )));
        }
    }

    Ok(())
}

fn reply_error_message(code: u8) -> String {
    match code {
        0x01 => "general SOCKS server failure".to_string(),
        0x02 => "connection not allowed by ruleset".to_string(),
        0x03 => "network unreachable".to_string(),
        0x04 => "host unreachable".to_string(),
        0x05 => "connection refused".to_string(),
        0x06 => "TTL expired".to_string(),
        0x07 => "command not supported".to_string(),
        0x08 => "address type not supported".to_string(),
        _ => format!("unknown reply code 0x{:02x}", code),
    }
}
