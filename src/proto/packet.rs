use bytes::BytesMut;
use tokio::io;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::proto::{ProtoError, BUF_SIZE, GPS_HEADER, W3GS_HEADER};

/// Raw wire frame.
///
/// Carries a W3GS or GPS packet ID and its payload bytes. The four byte
/// header (`[header][id][len u16 LE]`) is stripped on decode and prepended on
/// encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Frame header byte, [`W3GS_HEADER`] or [`GPS_HEADER`].
    pub header: u8,

    /// Packet type ID.
    pub id: u8,

    /// Packet payload.
    pub data: Vec<u8>,
}

impl RawPacket {
    /// Construct a new W3GS packet.
    pub fn w3gs(id: u8, data: Vec<u8>) -> Self {
        Self {
            header: W3GS_HEADER,
            id,
            data,
        }
    }

    /// Construct a new GPS packet.
    pub fn gps(id: u8, data: Vec<u8>) -> Self {
        Self {
            header: GPS_HEADER,
            id,
            data,
        }
    }

    /// Whether this is a GPS sub-protocol frame.
    pub fn is_gps(&self) -> bool {
        self.header == GPS_HEADER
    }

    /// Decode a packet from a full frame buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < 4 {
            return Err(ProtoError::FrameTooShort(buf.len() as u16));
        }
        let header = buf[0];
        if header != W3GS_HEADER && header != GPS_HEADER {
            return Err(ProtoError::BadHeader(header));
        }
        let len = u16::from_le_bytes([buf[2], buf[3]]);
        if len < 4 || buf.len() < len as usize {
            return Err(ProtoError::FrameTooShort(len));
        }
        Ok(Self {
            header,
            id: buf[1],
            data: buf[4..len as usize].to_vec(),
        })
    }

    /// Encode the packet to a full frame buffer.
    pub fn encode(&self) -> Vec<u8> {
        let len = (self.data.len() + 4) as u16;
        let mut packet = Vec::with_capacity(len as usize);
        packet.push(self.header);
        packet.push(self.id);
        packet.extend_from_slice(&len.to_le_bytes());
        packet.extend_from_slice(&self.data);
        packet
    }
}

/// Peek the full frame length from a partial buffer.
///
/// Returns `None` when more bytes are needed, an error on a malformed header.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, ProtoError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != W3GS_HEADER && buf[0] != GPS_HEADER {
        return Err(ProtoError::BadHeader(buf[0]));
    }
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u16::from_le_bytes([buf[2], buf[3]]);
    if len < 4 {
        return Err(ProtoError::FrameTooShort(len));
    }
    Ok(Some(len as usize))
}

/// Read one raw packet from a stream.
///
/// Returns `Ok(None)` if the peer closed the connection.
pub async fn read_packet(
    buf: &mut BytesMut,
    stream: &mut OwnedReadHalf,
) -> Result<Option<RawPacket>, ProtoError> {
    loop {
        // Parse a full frame out of the buffer if we have one
        if let Some(len) = frame_len(buf)? {
            if buf.len() >= len {
                let raw = buf.split_to(len);
                return Ok(Some(RawPacket::decode(&raw)?));
            }
        }

        // Read more bytes from the socket
        let mut tmp = Vec::with_capacity(BUF_SIZE);
        match stream.read_buf(&mut tmp).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Ok(None),
        }

        if tmp.is_empty() {
            return Ok(None);
        }
        buf.extend(tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::id;

    #[test]
    fn round_trip_w3gs() {
        let packet = RawPacket::w3gs(id::PING_FROM_HOST, vec![1, 2, 3, 4]);
        let encoded = packet.encode();
        assert_eq!(encoded[0], W3GS_HEADER);
        assert_eq!(encoded[1], id::PING_FROM_HOST);
        assert_eq!(u16::from_le_bytes([encoded[2], encoded[3]]), 8);
        assert_eq!(RawPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn round_trip_gps() {
        let packet = RawPacket::gps(crate::proto::gps_id::ACK, 42u32.to_le_bytes().to_vec());
        assert_eq!(RawPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn empty_payload() {
        let packet = RawPacket::w3gs(id::COUNTDOWN_START, vec![]);
        let encoded = packet.encode();
        assert_eq!(encoded.len(), 4);
        assert_eq!(RawPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn rejects_short_frame() {
        // Length field below the header size is a protocol violation
        assert!(matches!(
            RawPacket::decode(&[W3GS_HEADER, 0x01, 3, 0]),
            Err(ProtoError::FrameTooShort(3))
        ));
    }

    #[test]
    fn rejects_unknown_header() {
        assert!(matches!(
            RawPacket::decode(&[0xAB, 0x01, 4, 0]),
            Err(ProtoError::BadHeader(0xAB))
        ));
    }

    #[test]
    fn frame_len_incomplete() {
        assert_eq!(frame_len(&[]).unwrap(), None);
        assert_eq!(frame_len(&[W3GS_HEADER, 0x01]).unwrap(), None);
        assert_eq!(frame_len(&[W3GS_HEADER, 0x01, 10, 0]).unwrap(), Some(10));
    }
}
