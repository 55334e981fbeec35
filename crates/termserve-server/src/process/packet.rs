//! Length-prefixed packets exchanged with the application over stdio.
//!
//! Layout: one type byte, a big-endian `u32` payload length, the payload.
//! `D` carries raw terminal data, `M` a JSON meta object, `P` a packed
//! payload that is passed through undecoded.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 5;

/// Largest payload accepted in either direction.
pub const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Data(Bytes),
    Meta(Value),
    Packed(Bytes),
}

impl Packet {
    fn type_byte(&self) -> u8 {
        match self {
            Self::Data(_) => b'D',
            Self::Meta(_) => b'M',
            Self::Packed(_) => b'P',
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),
    #[error("packet of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("invalid meta payload: {0}")]
    InvalidMeta(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = PacketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, PacketError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = src[0];
        if !matches!(kind, b'D' | b'M' | b'P') {
            return Err(PacketError::UnknownType(kind));
        }
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > MAX_PACKET_LEN {
            return Err(PacketError::TooLarge(len));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        let packet = match kind {
            b'D' => Packet::Data(payload),
            b'M' => Packet::Meta(serde_json::from_slice(&payload)?),
            _ => Packet::Packed(payload),
        };
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = PacketError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), PacketError> {
        let kind = packet.type_byte();
        let payload = match packet {
            Packet::Data(data) | Packet::Packed(data) => data,
            Packet::Meta(value) => Bytes::from(serde_json::to_vec(&value)?),
        };
        if payload.len() > MAX_PACKET_LEN {
            return Err(PacketError::TooLarge(payload.len()));
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(kind);
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(packet: Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        PacketCodec.encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn data_wire_layout() {
        let buf = encode(Packet::Data(Bytes::from_static(b"hello")));
        assert_eq!(&buf[..], b"D\x00\x00\x00\x05hello");
    }

    #[test]
    fn meta_wire_layout() {
        let buf = encode(Packet::Meta(json!({"type": "quit"})));
        assert_eq!(&buf[..5], b"M\x00\x00\x00\x0f");
        assert_eq!(&buf[5..], br#"{"type":"quit"}"#);
    }

    #[test]
    fn decodes_across_partial_reads() {
        let whole = encode(Packet::Meta(json!({"type": "exit"})));
        let mut src = BytesMut::new();
        let mut codec = PacketCodec;

        src.extend_from_slice(&whole[..3]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&whole[3..9]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&whole[9..]);
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Packet::Meta(json!({"type": "exit"}))));
        assert!(src.is_empty());
    }

    #[test]
    fn decodes_back_to_back_packets() {
        let mut src = encode(Packet::Data(Bytes::from_static(b"a")));
        src.extend_from_slice(&encode(Packet::Packed(Bytes::from_static(b"\x93\x01"))));
        let mut codec = PacketCodec;
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Packet::Data(Bytes::from_static(b"a"))));
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Packet::Packed(Bytes::from_static(b"\x93\x01"))));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn empty_payload() {
        let mut src = BytesMut::from(&b"D\x00\x00\x00\x00"[..]);
        assert_eq!(PacketCodec.decode(&mut src).unwrap(), Some(Packet::Data(Bytes::new())));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut src = BytesMut::from(&b"X\x00\x00\x00\x00"[..]);
        assert!(matches!(PacketCodec.decode(&mut src), Err(PacketError::UnknownType(b'X'))));
    }

    #[test]
    fn rejects_oversized_length() {
        let mut src = BytesMut::from(&b"D\xff\xff\xff\xff"[..]);
        assert!(matches!(PacketCodec.decode(&mut src), Err(PacketError::TooLarge(_))));
    }

    #[test]
    fn rejects_bad_meta_json() {
        let mut src = BytesMut::from(&b"M\x00\x00\x00\x03{x}"[..]);
        assert!(matches!(PacketCodec.decode(&mut src), Err(PacketError::InvalidMeta(_))));
    }
}
