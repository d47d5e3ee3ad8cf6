use crate::proto::packet::RawPacket;
use crate::proto::{id, put_cstring, Cursor, ProtoError};

/// Product tag for The Frozen Throne, little-endian "W3XP".
pub const PRODUCT_TFT: u32 = u32::from_le_bytes(*b"PX3W");

/// Product tag for Reign of Chaos, little-endian "WAR3".
pub const PRODUCT_ROC: u32 = u32::from_le_bytes(*b"3RAW");

/// Apply the 7-to-8 mask expansion the client expects for stat strings.
///
/// Every group of up to seven bytes is preceded by a mask byte holding the
/// low bits, so no encoded byte is zero.
pub fn encode_stat_string(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 7 + 1);
    for chunk in data.chunks(7) {
        let mut mask = 1u8;
        for (i, b) in chunk.iter().enumerate() {
            if b % 2 == 0 {
                mask |= 1 << (i + 1);
            }
        }
        out.push(mask);
        for (i, b) in chunk.iter().enumerate() {
            if mask & (1 << (i + 1)) != 0 {
                out.push(b + 1);
            } else {
                out.push(*b);
            }
        }
    }
    out
}

/// Full game advertisement.
#[derive(Debug, Clone)]
pub struct GameInfo<'a> {
    pub product: u32,
    pub version: u32,
    pub host_counter: u32,
    pub entry_key: u32,
    pub game_name: &'a str,
    /// Encoded stat string, opaque to the host.
    pub stat_string: &'a [u8],
    pub slots_total: u32,
    pub game_type_flags: u32,
    pub slots_open: u32,
    pub uptime_secs: u32,
    pub port: u16,
}

/// Byte offsets into an encoded `GAMEINFO` payload for in-place patching.
#[derive(Debug, Clone)]
pub struct GameInfoTemplate {
    pub bytes: Vec<u8>,
    version_at: usize,
    dynamic_at: usize,
}

impl GameInfo<'_> {
    pub const PACKET_TYPE_ID: u8 = id::GAMEINFO;

    /// Encode once into a patchable template.
    pub fn template(&self) -> GameInfoTemplate {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.product.to_le_bytes());
        let version_at = buf.len();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.host_counter.to_le_bytes());
        buf.extend_from_slice(&self.entry_key.to_le_bytes());
        put_cstring(&mut buf, self.game_name);
        buf.push(0);
        buf.extend_from_slice(self.stat_string);
        buf.push(0);
        buf.extend_from_slice(&self.slots_total.to_le_bytes());
        buf.extend_from_slice(&self.game_type_flags.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        let dynamic_at = buf.len();
        buf.extend_from_slice(&self.slots_open.to_le_bytes());
        buf.extend_from_slice(&self.uptime_secs.to_le_bytes());
        buf.extend_from_slice(&self.port.to_le_bytes());
        GameInfoTemplate {
            bytes: buf,
            version_at,
            dynamic_at,
        }
    }
}

impl GameInfoTemplate {
    /// Rebuild the advertisement with fresh dynamic fields.
    pub fn patched(&self, version: u32, slots_open: u32, uptime_secs: u32, port: u16) -> RawPacket {
        let mut bytes = self.bytes.clone();
        bytes[self.version_at..self.version_at + 4].copy_from_slice(&version.to_le_bytes());
        let d = self.dynamic_at;
        bytes[d..d + 4].copy_from_slice(&slots_open.to_le_bytes());
        bytes[d + 4..d + 8].copy_from_slice(&uptime_secs.to_le_bytes());
        bytes[d + 8..d + 10].copy_from_slice(&port.to_le_bytes());
        RawPacket::w3gs(GameInfo::PACKET_TYPE_ID, bytes)
    }
}

/// A game appeared; sent once per supported version.
pub fn create_game(product: u32, version: u32, host_counter: u32) -> RawPacket {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&product.to_le_bytes());
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&host_counter.to_le_bytes());
    RawPacket::w3gs(id::CREATEGAME, buf)
}

/// Lightweight periodic refresh.
pub fn refresh_game(host_counter: u32, players: u32, slots_open: u32) -> RawPacket {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&host_counter.to_le_bytes());
    buf.extend_from_slice(&players.to_le_bytes());
    buf.extend_from_slice(&slots_open.to_le_bytes());
    RawPacket::w3gs(id::REFRESHGAME, buf)
}

/// The game is gone.
pub fn decreate_game(host_counter: u32) -> RawPacket {
    RawPacket::w3gs(id::DECREATEGAME, host_counter.to_le_bytes().to_vec())
}

/// LAN search datagram from a client looking for games.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchGame {
    pub product: u32,
    pub version: u32,
}

impl SearchGame {
    pub const PACKET_TYPE_ID: u8 = id::SEARCHGAME;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        Ok(Self {
            product: cur.u32()?,
            version: cur.u32()?,
        })
    }
}
