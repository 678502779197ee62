use bytes::{Buf, Bytes, BytesMut};

/// Streaming splitter for the UDP/DNS carrier: `len(2, big-endian) bytes(len)`,
/// repeated. A single client chunk may contain several packets, and a packet
/// may span chunk boundaries.
#[derive(Debug, Default)]
pub struct PacketSplitter {
    buf: BytesMut,
}

impl PacketSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete packet, or `None` until more bytes arrive.
    pub fn next_packet(&mut self) -> Option<Bytes> {
        if self.buf.len() < 2 {
            return None;
        }
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        if self.buf.len() < 2 + len {
            return None;
        }
        self.buf.advance(2);
        Some(self.buf.split_to(len).freeze())
    }

    /// Bytes held back waiting for a complete packet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn splits_single_packet() {
        let mut splitter = PacketSplitter::new();
        splitter.push(&framed(b"query"));
        assert_eq!(splitter.next_packet().unwrap().as_ref(), b"query");
        assert!(splitter.next_packet().is_none());
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn splits_concatenated_packets_in_one_chunk() {
        let mut chunk = framed(b"one");
        chunk.extend_from_slice(&framed(b"two"));
        chunk.extend_from_slice(&framed(b"three"));

        let mut splitter = PacketSplitter::new();
        splitter.push(&chunk);

        assert_eq!(splitter.next_packet().unwrap().as_ref(), b"one");
        assert_eq!(splitter.next_packet().unwrap().as_ref(), b"two");
        assert_eq!(splitter.next_packet().unwrap().as_ref(), b"three");
        assert!(splitter.next_packet().is_none());
    }

    #[test]
    fn reassembles_packet_split_across_chunks() {
        let full = framed(b"split across chunks");
        let (a, b) = full.split_at(7);

        let mut splitter = PacketSplitter::new();
        splitter.push(a);
        assert!(splitter.next_packet().is_none());
        splitter.push(b);
        assert_eq!(
            splitter.next_packet().unwrap().as_ref(),
            b"split across chunks"
        );
    }

    #[test]
    fn partial_length_prefix_waits() {
        let mut splitter = PacketSplitter::new();
        splitter.push(&[0x00]);
        assert!(splitter.next_packet().is_none());
        splitter.push(&[0x02, 0xab]);
        assert!(splitter.next_packet().is_none());
        splitter.push(&[0xcd]);
        assert_eq!(splitter.next_packet().unwrap().as_ref(), &[0xab, 0xcd][..]);
    }

    #[test]
    fn zero_length_packet_is_emitted_empty() {
        let mut splitter = PacketSplitter::new();
        splitter.push(&[0x00, 0x00]);
        let packet = splitter.next_packet().unwrap();
        assert!(packet.is_empty());
    }
}
