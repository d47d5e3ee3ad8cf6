use std::net::{Ipv4Addr, SocketAddrV4};

use crate::proto::packet::RawPacket;
use crate::proto::{get_sock_addr, id, put_cstring, put_sock_addr, Cursor, ProtoError};
use crate::slot::{Slot, SlotTable};

/// Join request from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqJoin {
    /// Host counter the client believes it is joining; the high byte names
    /// the origin realm.
    pub host_counter: u32,

    /// Entry key echoed by LAN clients.
    pub entry_key: u32,

    /// Port the client listens on for peer connections.
    pub listen_port: u16,

    /// Key for client-to-client connections.
    pub peer_key: u32,

    /// Requested player name.
    pub name: String,

    /// Address the client reports for itself.
    pub internal_addr: SocketAddrV4,
}

impl ReqJoin {
    pub const PACKET_TYPE_ID: u8 = id::REQJOIN;

    /// Realm nibble of the host counter.
    pub fn realm_index(&self) -> u8 {
        (self.host_counter >> 24) as u8
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let host_counter = cur.u32()?;
        let entry_key = cur.u32()?;
        let _unknown = cur.u8()?;
        let listen_port = cur.u16()?;
        let peer_key = cur.u32()?;
        let name = cur.cstring()?;
        // Remainder: 4 unknown bytes then the internal address blob
        let _unknown2 = cur.u32()?;
        let internal_addr = get_sock_addr(&mut cur)?;
        Ok(Self {
            host_counter,
            entry_key,
            listen_port,
            peer_key,
            name,
            internal_addr,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.host_counter.to_le_bytes());
        buf.extend_from_slice(&self.entry_key.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.listen_port.to_le_bytes());
        buf.extend_from_slice(&self.peer_key.to_le_bytes());
        put_cstring(&mut buf, &self.name);
        buf.extend_from_slice(&0u32.to_le_bytes());
        put_sock_addr(&mut buf, self.internal_addr);
        buf
    }
}

/// Encode the slot array block shared by `SLOTINFOJOIN` and `SLOTINFO`.
///
/// `[len u16][num_slots][9 bytes per slot][random_seed][layout][players]`
pub fn encode_slot_block(
    slots: &[Slot],
    random_seed: u32,
    layout_style: u8,
    num_player_slots: u8,
) -> Vec<u8> {
    let inner = 1 + slots.len() * 9 + 6;
    let mut buf = Vec::with_capacity(inner + 2);
    buf.extend_from_slice(&(inner as u16).to_le_bytes());
    buf.push(slots.len() as u8);
    for slot in slots {
        buf.push(slot.uid);
        buf.push(if slot.download_progress == 255 {
            255
        } else {
            slot.download_progress
        });
        buf.push(slot.status.to_u8());
        buf.push(slot.is_computer as u8);
        buf.push(slot.team);
        buf.push(slot.color);
        buf.push(slot.race);
        buf.push(slot.difficulty.to_u8());
        buf.push(slot.handicap);
    }
    buf.extend_from_slice(&random_seed.to_le_bytes());
    buf.push(layout_style);
    buf.push(num_player_slots);
    buf
}

/// Admission reply carrying the full slot snapshot.
#[derive(Debug, Clone)]
pub struct SlotInfoJoin<'a> {
    pub table: &'a SlotTable,
    pub random_seed: u32,
    pub layout_style: u8,
    pub uid: u8,
    pub external_addr: SocketAddrV4,
}

impl SlotInfoJoin<'_> {
    pub const PACKET_TYPE_ID: u8 = id::SLOTINFOJOIN;

    pub fn encode(&self) -> RawPacket {
        let mut buf = encode_slot_block(
            self.table.slots(),
            self.random_seed,
            self.layout_style,
            self.table.len() as u8,
        );
        buf.push(self.uid);
        put_sock_addr(&mut buf, self.external_addr);
        RawPacket::w3gs(Self::PACKET_TYPE_ID, buf)
    }
}

/// Standalone slot snapshot broadcast.
pub fn slot_info(table: &SlotTable, random_seed: u32, layout_style: u8) -> RawPacket {
    RawPacket::w3gs(
        id::SLOTINFO,
        encode_slot_block(
            table.slots(),
            random_seed,
            layout_style,
            table.len() as u8,
        ),
    )
}

/// Reason a join request was denied.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RejectReason {
    Full,
    Started,
    WrongPassword,
}

impl RejectReason {
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Full => 9,
            Self::Started => 10,
            Self::WrongPassword => 27,
        }
    }
}

/// Admission denial.
pub fn reject_join(reason: RejectReason) -> RawPacket {
    RawPacket::w3gs(id::REJECTJOIN, reason.to_u32().to_le_bytes().to_vec())
}

/// A player or virtual host appeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub peer_key: u32,
    pub uid: u8,
    pub name: String,
    pub external_addr: SocketAddrV4,
    pub internal_addr: SocketAddrV4,
}

impl PlayerInfo {
    pub const PACKET_TYPE_ID: u8 = id::PLAYERINFO;

    /// Info for a server-backed user with no real address.
    pub fn synthetic(uid: u8, name: &str) -> Self {
        let zero = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        Self {
            peer_key: 1,
            uid,
            name: name.to_owned(),
            external_addr: zero,
            internal_addr: zero,
        }
    }

    pub fn encode(&self) -> RawPacket {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.peer_key.to_le_bytes());
        buf.push(self.uid);
        put_cstring(&mut buf, &self.name);
        // Two unknown bytes between name and addresses
        buf.extend_from_slice(&[1, 0]);
        put_sock_addr(&mut buf, self.external_addr);
        put_sock_addr(&mut buf, self.internal_addr);
        RawPacket::w3gs(Self::PACKET_TYPE_ID, buf)
    }

    #[cfg(test)]
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let peer_key = cur.u32()?;
        let uid = cur.u8()?;
        let name = cur.cstring()?;
        let _pad = cur.u16()?;
        let external_addr = get_sock_addr(&mut cur)?;
        let internal_addr = get_sock_addr(&mut cur)?;
        Ok(Self {
            peer_key,
            uid,
            name,
            external_addr,
            internal_addr,
        })
    }
}

/// Reason a player left, as shown by the client.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LeaveReason {
    Disconnect,
    Lost,
    LostBuildings,
    Won,
    Draw,
    Observer,
    Lobby,
    Gproxy,
}

impl LeaveReason {
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Disconnect => 0x01,
            Self::Lost => 0x07,
            Self::LostBuildings => 0x08,
            Self::Won => 0x09,
            Self::Draw => 0x0A,
            Self::Observer => 0x0B,
            Self::Lobby => 0x0D,
            Self::Gproxy => 0x64,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x01 => Self::Disconnect,
            0x07 => Self::Lost,
            0x08 => Self::LostBuildings,
            0x09 => Self::Won,
            0x0A => Self::Draw,
            0x0B => Self::Observer,
            0x0D => Self::Lobby,
            0x64 => Self::Gproxy,
            _ => return None,
        })
    }
}

/// A player departed.
pub fn player_leave_others(uid: u8, reason: LeaveReason) -> RawPacket {
    let mut buf = Vec::with_capacity(5);
    buf.push(uid);
    buf.extend_from_slice(&reason.to_u32().to_le_bytes());
    RawPacket::w3gs(id::PLAYERLEAVE_OTHERS, buf)
}

/// Client announces leaving; carries the client-side reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveReq {
    pub reason: u32,
}

impl LeaveReq {
    pub const PACKET_TYPE_ID: u8 = id::LEAVEREQ;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        Ok(Self { reason: cur.u32()? })
    }
}

/// Acknowledge a leave request before dropping the socket.
pub fn leave_ack() -> RawPacket {
    RawPacket::w3gs(id::LEAVEACK, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::melee_table;

    #[test]
    fn req_join_round_trip() {
        let req = ReqJoin {
            host_counter: 0x10000001,
            entry_key: 0xDEADBEEF,
            listen_port: 6112,
            peer_key: 42,
            name: "alice".into(),
            internal_addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 7), 6112),
        };
        let decoded = ReqJoin::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.realm_index(), 0x10);
    }

    #[test]
    fn player_info_round_trip() {
        let info = PlayerInfo {
            peer_key: 2,
            uid: 3,
            name: "bob".into(),
            external_addr: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6113),
            internal_addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), 6112),
        };
        let packet = info.encode();
        assert_eq!(packet.id, id::PLAYERINFO);
        assert_eq!(PlayerInfo::decode(&packet.data).unwrap(), info);
    }

    #[test]
    fn slot_block_size() {
        let table = melee_table(12, crate::slot::OBSERVER_SENTINEL_LEGACY, false);
        let block = encode_slot_block(table.slots(), 7, 0, 12);
        // Length prefix + declared inner size
        let inner = u16::from_le_bytes([block[0], block[1]]) as usize;
        assert_eq!(block.len(), inner + 2);
        assert_eq!(block[2], 12);
    }

    #[test]
    fn reject_reasons() {
        assert_eq!(reject_join(RejectReason::Full).data, 9u32.to_le_bytes());
        assert_eq!(
            reject_join(RejectReason::WrongPassword).data,
            27u32.to_le_bytes()
        );
    }

    #[test]
    fn leave_reason_codes() {
        for reason in [
            LeaveReason::Disconnect,
            LeaveReason::Lost,
            LeaveReason::Lobby,
            LeaveReason::Gproxy,
        ] {
            assert_eq!(LeaveReason::from_u32(reason.to_u32()), Some(reason));
        }
        assert_eq!(LeaveReason::from_u32(0xFF), None);
    }
}
