use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;
use uuid::Uuid;

use crate::utils::error::GatewayError;

/// VLESS protocol version understood by this gateway.
pub const VLESS_VERSION: u8 = 0x00;

/// Smallest possible request: ver(1) + uuid(16) + optlen(1) + cmd(1) +
/// port(2) + atyp(1) + shortest address (2 bytes for a 1-char domain).
pub const MIN_REQUEST_LEN: usize = 24;

/// Address type bytes as carried on the VLESS wire.
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x02;
pub const ATYP_IPV6: u8 = 0x03;

/// The only port on which the UDP command is honored.
pub const DNS_PORT: u16 = 53;

/// VLESS commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Tcp = 0x01,
    Udp = 0x02,
}

impl TryFrom<u8> for Command {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Command::Tcp),
            0x02 => Ok(Command::Udp),
            other => Err(GatewayError::MalformedHeader(format!(
                "unsupported command: 0x{:02x}",
                other
            ))),
        }
    }
}

/// Destination address as decoded from the request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4([u8; 4]),
    Domain(String),
    Ipv6([u8; 16]),
}

impl fmt::Display for Address {
    /// IPv4 prints dotted-quad, domains print verbatim, and IPv6 prints as
    /// eight colon-separated lowercase hex groups with no `::` compression.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(octets) => write!(f, "{}", Ipv4Addr::from(*octets)),
            Address::Domain(domain) => f.write_str(domain),
            Address::Ipv6(octets) => {
                for (i, pair) in octets.chunks_exact(2).enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{:x}", u16::from_be_bytes([pair[0], pair[1]]))?;
                }
                Ok(())
            }
        }
    }
}

/// Decoded VLESS request header plus the initial payload that followed it.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub version: u8,
    pub user_id: Uuid,
    pub command: Command,
    pub port: u16,
    pub address: Address,
    pub payload: Bytes,
}

impl RequestHeader {
    pub fn destination(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Build the two-byte VLESS response header: the request's version byte
/// followed by a zero addons length.
pub fn build_response(version: u8) -> [u8; 2] {
    [version, 0x00]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_conversion() {
        assert_eq!(Command::try_from(0x01).unwrap(), Command::Tcp);
        assert_eq!(Command::try_from(0x02).unwrap(), Command::Udp);
        assert!(Command::try_from(0x03).is_err());
        assert!(Command::try_from(0x00).is_err());
    }

    #[test]
    fn ipv4_displays_dotted_quad() {
        let addr = Address::Ipv4([1, 2, 3, 4]);
        assert_eq!(addr.to_string(), "1.2.3.4");
    }

    #[test]
    fn ipv6_displays_uncompressed_groups() {
        let mut octets = [0u8; 16];
        octets[0] = 0x20;
        octets[1] = 0x01;
        octets[2] = 0x0d;
        octets[3] = 0xb8;
        octets[15] = 0x01;
        let addr = Address::Ipv6(octets);
        assert_eq!(addr.to_string(), "2001:db8:0:0:0:0:0:1");
    }

    #[test]
    fn response_header_echoes_version() {
        assert_eq!(build_response(0x00), [0x00, 0x00]);
        assert_eq!(build_response(0x05), [0x05, 0x00]);
    }
}
