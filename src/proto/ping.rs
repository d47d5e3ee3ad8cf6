use crate::proto::packet::RawPacket;
use crate::proto::{id, Cursor, ProtoError};

/// Latency probe, payload is the host uptime in milliseconds.
pub fn ping_from_host(ticks_ms: u32) -> RawPacket {
    RawPacket::w3gs(id::PING_FROM_HOST, ticks_ms.to_le_bytes().to_vec())
}

/// Probe reply echoing the host's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongToHost {
    pub ticks_ms: u32,
}

impl PongToHost {
    pub const PACKET_TYPE_ID: u8 = id::PONG_TO_HOST;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        Ok(Self {
            ticks_ms: cur.u32()?,
        })
    }

    /// Round trip time given the current uptime.
    pub fn rtt_ms(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.ticks_ms)
    }
}
