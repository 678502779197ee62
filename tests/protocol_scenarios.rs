// Wire-level scenarios for the VLESS request codec, driven with literal
// frames as a client would send them.

use bytes::Bytes;
use uuid::Uuid;
use vlessgate::protocol::{build_response, parse_request, Address, Command};
use vlessgate::GatewayError;

const USER: &str = "10e894da-61b1-4998-ac2b-e9ccb6af9d30";

fn accepted() -> Vec<Uuid> {
    vec![USER.parse().unwrap()]
}

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

#[test]
fn tcp_happy_path_frame() {
    // ver | uuid | optlen | cmd | port 443 | atyp v4 | 1.2.3.4 | payload
    let mut frame = hex("0010e894da61b14998ac2be9ccb6af9d30000101bb0101020304");
    frame.extend_from_slice(b"GET / HTTP/1.0\r\n\r\n");

    let header = parse_request(Bytes::from(frame), &accepted()).unwrap();
    assert_eq!(header.version, 0x00);
    assert_eq!(header.user_id, USER.parse::<Uuid>().unwrap());
    assert_eq!(header.command, Command::Tcp);
    assert_eq!(header.port, 443);
    assert_eq!(header.address, Address::Ipv4([1, 2, 3, 4]));
    assert_eq!(header.destination(), "1.2.3.4:443");
    assert_eq!(header.payload.as_ref(), b"GET / HTTP/1.0\r\n\r\n");

    assert_eq!(build_response(header.version), [0x00, 0x00]);
}

#[test]
fn ipv6_destination_parses_to_uncompressed_form() {
    let mut frame = hex("0010e894da61b14998ac2be9ccb6af9d30000101bb03");
    frame.extend_from_slice(&hex("20010db8000000000000000000000001"));

    let header = parse_request(Bytes::from(frame), &accepted()).unwrap();
    assert_eq!(header.address.to_string(), "2001:db8:0:0:0:0:0:1");
    assert_eq!(header.port, 443);
}

#[test]
fn stranger_uuid_is_rejected_before_anything_else_is_read() {
    let mut frame = hex("0000000000000040008000000000000000000101bb0101020304");
    frame.extend_from_slice(b"GET / HTTP/1.0\r\n\r\n");

    let err = parse_request(Bytes::from(frame), &accepted()).unwrap_err();
    assert!(matches!(err, GatewayError::AuthFailed));
}

#[test]
fn udp_dns_frame_carries_length_prefixed_payload() {
    // cmd 2, port 53, atyp v4 1.1.1.1, payload = len-prefixed 29-byte query
    let mut frame = hex("0010e894da61b14998ac2be9ccb6af9d3000020035" );
    frame.push(0x01);
    frame.extend_from_slice(&[1, 1, 1, 1]);
    frame.extend_from_slice(&[0x00, 0x1d]);
    frame.extend_from_slice(&[0x5a; 29]);

    let header = parse_request(Bytes::from(frame), &accepted()).unwrap();
    assert_eq!(header.command, Command::Udp);
    assert_eq!(header.port, 53);
    assert_eq!(header.payload.len(), 2 + 29);
}

#[test]
fn domain_frame_truncated_at_address_type_is_rejected() {
    // ver | uuid | optlen 2 | addons | cmd | port | atyp domain, then nothing:
    // 24 bytes, long enough for the minimum-length gate but missing the
    // domain length byte
    let frame = hex("0010e894da61b14998ac2be9ccb6af9d3002dead0101bb02");
    assert_eq!(frame.len(), 24);

    let err = parse_request(Bytes::from(frame), &accepted()).unwrap_err();
    assert!(matches!(err, GatewayError::MalformedHeader(_)));
}

#[test]
fn domain_destination_round_trip() {
    let mut frame = hex("0010e894da61b14998ac2be9ccb6af9d3000010050");
    frame.push(0x02);
    frame.push(11);
    frame.extend_from_slice(b"example.com");

    let header = parse_request(Bytes::from(frame), &accepted()).unwrap();
    assert_eq!(header.address, Address::Domain("example.com".to_string()));
    assert_eq!(header.destination(), "example.com:80");
    assert!(header.payload.is_empty());
}
