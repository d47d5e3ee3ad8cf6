use crate::proto::packet::RawPacket;
use crate::proto::{gps_id, Cursor, ProtoError};

/// Advertise reconnect support to a freshly joined client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Init {
    /// Port to reconnect to.
    pub port: u16,

    /// The player's UID.
    pub uid: u8,

    /// Key the client must present on reconnect.
    pub reconnect_key: u32,

    /// Empty actions inserted per tick to bridge a reconnect gap.
    pub empty_actions: u8,
}

impl Init {
    pub const PACKET_TYPE_ID: u8 = gps_id::INIT;

    pub fn encode(&self) -> RawPacket {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf.push(self.uid);
        buf.extend_from_slice(&self.reconnect_key.to_le_bytes());
        buf.push(self.empty_actions);
        RawPacket::gps(Self::PACKET_TYPE_ID, buf)
    }

    /// A client may also send INIT to announce its proxy version.
    pub fn decode_version(data: &[u8]) -> Result<u32, ProtoError> {
        let mut cur = Cursor::new(data);
        if cur.remaining() >= 4 {
            cur.u32()
        } else {
            Ok(0)
        }
    }
}

/// Negotiate the extended variant, which checks the game id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportExtended {
    pub wait_secs: u32,
    pub game_id: u32,
}

impl SupportExtended {
    pub const PACKET_TYPE_ID: u8 = gps_id::SUPPORT_EXTENDED;

    pub fn encode(&self) -> RawPacket {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.wait_secs.to_le_bytes());
        buf.extend_from_slice(&self.game_id.to_le_bytes());
        RawPacket::gps(Self::PACKET_TYPE_ID, buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        Ok(Self {
            wait_secs: cur.u32()?,
            game_id: cur.u32()?,
        })
    }
}

/// Cumulative count of packets received, either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub received: u32,
}

impl Ack {
    pub const PACKET_TYPE_ID: u8 = gps_id::ACK;

    pub fn encode(&self) -> RawPacket {
        RawPacket::gps(Self::PACKET_TYPE_ID, self.received.to_le_bytes().to_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        Ok(Self {
            received: cur.u32()?,
        })
    }
}

/// A dropped client presenting its credentials on a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnect {
    pub uid: u8,
    pub reconnect_key: u32,
    pub last_received: u32,
    /// Present in the extended variant only.
    pub game_id: Option<u32>,
}

impl Reconnect {
    pub const PACKET_TYPE_ID: u8 = gps_id::RECONNECT;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let uid = cur.u8()?;
        let reconnect_key = cur.u32()?;
        let last_received = cur.u32()?;
        let game_id = if cur.remaining() >= 4 {
            Some(cur.u32()?)
        } else {
            None
        };
        Ok(Self {
            uid,
            reconnect_key,
            last_received,
            game_id,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.uid);
        buf.extend_from_slice(&self.reconnect_key.to_le_bytes());
        buf.extend_from_slice(&self.last_received.to_le_bytes());
        if let Some(game_id) = self.game_id {
            buf.extend_from_slice(&game_id.to_le_bytes());
        }
        buf
    }
}

/// Rotate the reconnect key after a failed attempt.
pub fn change_key(new_key: u32) -> RawPacket {
    RawPacket::gps(gps_id::CHANGEKEY, new_key.to_le_bytes().to_vec())
}

/// Refuse a reconnect attempt.
pub fn reject() -> RawPacket {
    RawPacket::gps(gps_id::REJECT, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::GPS_HEADER;

    #[test]
    fn init_is_gps_framed() {
        let packet = Init {
            port: 6112,
            uid: 3,
            reconnect_key: 0x1020_3040,
            empty_actions: 4,
        }
        .encode();
        assert_eq!(packet.header, GPS_HEADER);
        assert_eq!(packet.id, gps_id::INIT);
        assert_eq!(packet.data.len(), 8);
    }

    #[test]
    fn reconnect_round_trip_basic_and_extended() {
        let basic = Reconnect {
            uid: 5,
            reconnect_key: 99,
            last_received: 1000,
            game_id: None,
        };
        assert_eq!(Reconnect::decode(&basic.encode()).unwrap(), basic);

        let extended = Reconnect {
            game_id: Some(7),
            ..basic
        };
        assert_eq!(Reconnect::decode(&extended.encode()).unwrap(), extended);
    }

    #[test]
    fn ack_round_trip() {
        let ack = Ack { received: 12345 };
        assert_eq!(Ack::decode(&ack.encode().data).unwrap(), ack);
    }
}
