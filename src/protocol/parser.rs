use bytes::Bytes;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;
use uuid::Uuid;

use super::types::*;
use crate::utils::error::{GatewayError, Result};

/// Parse the VLESS request header out of the first client chunk.
///
/// Wire layout, all multi-byte integers big-endian:
/// `ver(1) uuid(16) L(1) addons(L) cmd(1) port(2) atyp(1) addr(var) payload(*)`
///
/// The addon bytes are length-skipped, never interpreted. Whatever follows
/// the address is returned as the initial payload; an empty payload is fine.
pub fn parse_request(buf: Bytes, accepted: &[Uuid]) -> Result<RequestHeader> {
    if buf.len() < MIN_REQUEST_LEN {
        return Err(GatewayError::MalformedHeader(format!(
            "request too short: {} bytes",
            buf.len()
        )));
    }

    let version = buf[0];

    let mut user = [0u8; 16];
    user.copy_from_slice(&buf[1..17]);
    if !user_is_accepted(&user, accepted) {
        return Err(GatewayError::AuthFailed);
    }
    let user_id = Uuid::from_bytes(user);

    let opt_len = buf[17] as usize;
    let cmd_index = 18 + opt_len;
    // cmd(1) + port(2) + atyp(1) must still fit after the addons
    if buf.len() < cmd_index + 4 {
        return Err(GatewayError::MalformedHeader(
            "request truncated after addons".to_string(),
        ));
    }

    let command = Command::try_from(buf[cmd_index])?;
    let port = u16::from_be_bytes([buf[cmd_index + 1], buf[cmd_index + 2]]);

    if command == Command::Udp && port != DNS_PORT {
        return Err(GatewayError::MalformedHeader(format!(
            "UDP relay is only available on port {DNS_PORT}, got {port}"
        )));
    }

    let atyp = buf[cmd_index + 3];
    let value_index = cmd_index + 4;

    let (address, addr_len) = match atyp {
        ATYP_IPV4 => {
            if buf.len() < value_index + 4 {
                return Err(GatewayError::MalformedHeader(
                    "truncated IPv4 address".to_string(),
                ));
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[value_index..value_index + 4]);
            (Address::Ipv4(octets), 4)
        }
        ATYP_DOMAIN => {
            if buf.len() <= value_index {
                return Err(GatewayError::MalformedHeader(
                    "truncated domain length".to_string(),
                ));
            }
            let domain_len = buf[value_index] as usize;
            if domain_len == 0 {
                return Err(GatewayError::MalformedHeader(
                    "empty destination address".to_string(),
                ));
            }
            if buf.len() < value_index + 1 + domain_len {
                return Err(GatewayError::MalformedHeader(
                    "truncated domain address".to_string(),
                ));
            }
            let domain = String::from_utf8(buf[value_index + 1..value_index + 1 + domain_len].to_vec())
                .map_err(|_| {
                    GatewayError::MalformedHeader("invalid domain encoding".to_string())
                })?;
            (Address::Domain(domain), 1 + domain_len)
        }
        ATYP_IPV6 => {
            if buf.len() < value_index + 16 {
                return Err(GatewayError::MalformedHeader(
                    "truncated IPv6 address".to_string(),
                ));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[value_index..value_index + 16]);
            (Address::Ipv6(octets), 16)
        }
        other => {
            return Err(GatewayError::MalformedHeader(format!(
                "unsupported address type: 0x{:02x}",
                other
            )));
        }
    };

    let payload = buf.slice(value_index + addr_len..);

    debug!(
        command = ?command,
        address = %address,
        port,
        payload_len = payload.len(),
        "parsed request header"
    );

    Ok(RequestHeader {
        version,
        user_id,
        command,
        port,
        address,
        payload,
    })
}

/// Constant-time membership check of the candidate user id against every
/// configured id. All ids are compared unconditionally; no early exit.
fn user_is_accepted(candidate: &[u8; 16], accepted: &[Uuid]) -> bool {
    let mut matched = Choice::from(0u8);
    for id in accepted {
        matched |= id.as_bytes().as_slice().ct_eq(candidate.as_slice());
    }
    matched.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "10e894da-61b1-4998-ac2b-e9ccb6af9d30";

    fn accepted() -> Vec<Uuid> {
        vec![USER.parse().unwrap()]
    }

    fn encode(
        version: u8,
        user: &Uuid,
        addons: &[u8],
        cmd: u8,
        port: u16,
        atyp: u8,
        addr: &[u8],
        payload: &[u8],
    ) -> Bytes {
        let mut buf = Vec::new();
        buf.push(version);
        buf.extend_from_slice(user.as_bytes());
        buf.push(addons.len() as u8);
        buf.extend_from_slice(addons);
        buf.push(cmd);
        buf.extend_from_slice(&port.to_be_bytes());
        buf.push(atyp);
        buf.extend_from_slice(addr);
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn parses_ipv4_request_with_payload() {
        let user: Uuid = USER.parse().unwrap();
        let payload = b"GET / HTTP/1.0\r\n\r\n";
        let buf = encode(0, &user, &[], 0x01, 443, ATYP_IPV4, &[1, 2, 3, 4], payload);

        let header = parse_request(buf, &accepted()).unwrap();
        assert_eq!(header.version, 0);
        assert_eq!(header.user_id, user);
        assert_eq!(header.command, Command::Tcp);
        assert_eq!(header.port, 443);
        assert_eq!(header.address, Address::Ipv4([1, 2, 3, 4]));
        assert_eq!(header.payload.as_ref(), payload);
    }

    #[test]
    fn parses_domain_request_and_skips_addons() {
        let user: Uuid = USER.parse().unwrap();
        let mut addr = vec![11u8];
        addr.extend_from_slice(b"example.com");
        let buf = encode(0, &user, &[0xde, 0xad], 0x01, 80, ATYP_DOMAIN, &addr, b"");

        let header = parse_request(buf, &accepted()).unwrap();
        assert_eq!(header.address, Address::Domain("example.com".to_string()));
        assert_eq!(header.port, 80);
        assert!(header.payload.is_empty());
    }

    #[test]
    fn parses_ipv6_request() {
        let user: Uuid = USER.parse().unwrap();
        let mut addr = [0u8; 16];
        addr[0] = 0x20;
        addr[1] = 0x01;
        addr[2] = 0x0d;
        addr[3] = 0xb8;
        addr[15] = 0x01;
        let buf = encode(0, &user, &[], 0x01, 443, ATYP_IPV6, &addr, b"");

        let header = parse_request(buf, &accepted()).unwrap();
        assert_eq!(header.address.to_string(), "2001:db8:0:0:0:0:0:1");
    }

    #[test]
    fn rejects_short_request() {
        let buf = Bytes::from_static(&[0u8; 23]);
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_unknown_user() {
        let stranger: Uuid = "00000000-0000-4000-8000-000000000000".parse().unwrap();
        let buf = encode(0, &stranger, &[], 0x01, 443, ATYP_IPV4, &[1, 2, 3, 4], b"");
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::AuthFailed)
        ));
    }

    #[test]
    fn accepts_any_configured_user() {
        let other: Uuid = "c2f8a3c4-5d6e-4f70-8191-a2b3c4d5e6f7".parse().unwrap();
        let ids = vec![USER.parse().unwrap(), other];
        let buf = encode(0, &other, &[], 0x01, 443, ATYP_IPV4, &[1, 2, 3, 4], b"");
        assert!(parse_request(buf, &ids).is_ok());
    }

    #[test]
    fn rejects_mux_command() {
        let user: Uuid = USER.parse().unwrap();
        let buf = encode(0, &user, &[], 0x03, 443, ATYP_IPV4, &[1, 2, 3, 4], b"");
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_udp_off_port_53() {
        let user: Uuid = USER.parse().unwrap();
        let buf = encode(0, &user, &[], 0x02, 443, ATYP_IPV4, &[1, 1, 1, 1], b"");
        assert!(parse_request(buf, &accepted()).is_err());
    }

    #[test]
    fn accepts_udp_on_port_53() {
        let user: Uuid = USER.parse().unwrap();
        let buf = encode(0, &user, &[], 0x02, 53, ATYP_IPV4, &[1, 1, 1, 1], b"\x00\x1dquery");
        let header = parse_request(buf, &accepted()).unwrap();
        assert_eq!(header.command, Command::Udp);
        assert_eq!(header.payload.len(), 7);
    }

    #[test]
    fn rejects_empty_domain() {
        let user: Uuid = USER.parse().unwrap();
        // pad the payload so the total stays above the minimum length
        let buf = encode(0, &user, &[], 0x01, 443, ATYP_DOMAIN, &[0], b"pad");
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_domain_frame_ending_at_address_type() {
        let user: Uuid = USER.parse().unwrap();
        // 24 bytes total: passes the minimum-length gate but ends right
        // after the atyp byte, before the domain length
        let buf = encode(0, &user, &[0xde, 0xad], 0x01, 443, ATYP_DOMAIN, &[], b"");
        assert_eq!(buf.len(), 24);
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_domain_frame_truncated_inside_name() {
        let user: Uuid = USER.parse().unwrap();
        // length byte claims 11 bytes but only 3 follow
        let buf = encode(0, &user, &[], 0x01, 443, ATYP_DOMAIN, &[11, b'e', b'x', b'a'], b"");
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_unknown_address_type() {
        let user: Uuid = USER.parse().unwrap();
        let buf = encode(0, &user, &[], 0x01, 443, 0x04, &[1, 2, 3, 4], b"");
        assert!(matches!(
            parse_request(buf, &accepted()),
            Err(GatewayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn header_survives_encode_parse_round_trip() {
        let user: Uuid = USER.parse().unwrap();
        let cases: &[(u8, u16, u8, &[u8])] = &[
            (0x01, 1, ATYP_IPV4, &[0, 0, 0, 0]),
            (0x01, 65535, ATYP_IPV4, &[255, 255, 255, 255]),
            (0x02, 53, ATYP_IPV6, &[0xfe; 16]),
        ];
        for &(cmd, port, atyp, addr) in cases {
            let payload = b"\x01\x02\x03";
            let buf = encode(7, &user, &[1, 2, 3, 4, 5], cmd, port, atyp, addr, payload);
            let header = parse_request(buf, &accepted()).unwrap();
            assert_eq!(header.version, 7);
            assert_eq!(header.command as u8, cmd);
            assert_eq!(header.port, port);
            assert_eq!(header.payload.as_ref(), payload);
        }
    }
}
