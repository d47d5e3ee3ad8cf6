pub mod action;
pub mod chat;
pub mod game;
pub mod gps;
pub mod info;
pub mod join;
pub mod map;
pub mod packet;
pub mod ping;

use thiserror::Error;

/// W3GS frame header byte.
pub const W3GS_HEADER: u8 = 0xF7;

/// GPS (reconnect proxy) frame header byte.
pub const GPS_HEADER: u8 = 0xF8;

/// Read buffer size for TCP streams.
pub const BUF_SIZE: usize = 8 * 1024;

/// Lowest supported game version.
pub const VERSION_MIN: u8 = 23;

/// Highest supported game version.
pub const VERSION_MAX: u8 = 63;

/// First version of the second feature tier (1.29).
///
/// From 1.29 on the client supports 24 slots, below it 12.
pub const VERSION_EXPANDED_SLOTS: u8 = 29;

/// Largest action payload a client may submit.
pub const MAX_ACTION_SIZE: usize = 1023;

/// Largest `INCOMING_ACTION` payload before spilling into `INCOMING_ACTION2`.
pub const MAX_ACTION_BATCH: usize = 1452;

/// Map data bytes carried per `MAPPART` packet.
pub const MAP_PART_SIZE: usize = 1442;

/// W3GS packet type identifiers used by the host.
pub mod id {
    pub const PING_FROM_HOST: u8 = 0x01;
    pub const SLOTINFOJOIN: u8 = 0x04;
    pub const REJECTJOIN: u8 = 0x05;
    pub const PLAYERINFO: u8 = 0x06;
    pub const PLAYERLEAVE_OTHERS: u8 = 0x07;
    pub const GAMELOADED_OTHERS: u8 = 0x08;
    pub const SLOTINFO: u8 = 0x09;
    pub const COUNTDOWN_START: u8 = 0x0A;
    pub const COUNTDOWN_END: u8 = 0x0B;
    pub const INCOMING_ACTION: u8 = 0x0C;
    pub const CHAT_FROM_HOST: u8 = 0x0F;
    pub const START_LAG: u8 = 0x10;
    pub const STOP_LAG: u8 = 0x11;
    pub const LEAVEACK: u8 = 0x1B;
    pub const REQJOIN: u8 = 0x1E;
    pub const LEAVEREQ: u8 = 0x21;
    pub const GAMELOADED_SELF: u8 = 0x23;
    pub const OUTGOING_ACTION: u8 = 0x26;
    pub const OUTGOING_KEEPALIVE: u8 = 0x27;
    pub const CHAT_TO_HOST: u8 = 0x28;
    pub const DROPREQ: u8 = 0x29;
    pub const SEARCHGAME: u8 = 0x2F;
    pub const GAMEINFO: u8 = 0x30;
    pub const CREATEGAME: u8 = 0x31;
    pub const REFRESHGAME: u8 = 0x32;
    pub const DECREATEGAME: u8 = 0x33;
    pub const MAPCHECK: u8 = 0x3D;
    pub const STARTDOWNLOAD: u8 = 0x3F;
    pub const MAPSIZE: u8 = 0x42;
    pub const MAPPART: u8 = 0x43;
    pub const PONG_TO_HOST: u8 = 0x46;
    pub const INCOMING_ACTION2: u8 = 0x48;
}

/// GPS packet type identifiers.
pub mod gps_id {
    pub const INIT: u8 = 0x01;
    pub const RECONNECT: u8 = 0x02;
    pub const ACK: u8 = 0x03;
    pub const REJECT: u8 = 0x04;
    pub const SUPPORT_EXTENDED: u8 = 0x05;
    pub const CHANGEKEY: u8 = 0x06;
}

/// Protocol decode/encode failure.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unexpected end of packet data")]
    UnexpectedEnd,

    #[error("unknown frame header byte 0x{0:02X}")]
    BadHeader(u8),

    #[error("frame length {0} shorter than header")]
    FrameTooShort(u16),

    #[error("string field is not terminated")]
    UnterminatedString,

    #[error("action of {0} bytes exceeds limit")]
    OversizedAction(usize),

    #[error("malformed {0} packet")]
    Malformed(&'static str),
}

/// Cursor over packet payload bytes.
///
/// Thin wrapper so decoders read fields without manual index bookkeeping.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8, ProtoError> {
        let b = *self.data.get(self.pos).ok_or(ProtoError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16(&mut self) -> Result<u16, ProtoError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, ProtoError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.remaining() < n {
            return Err(ProtoError::UnexpectedEnd);
        }
        let data: &'a [u8] = self.data;
        let b = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    /// Read a NUL-terminated string, lossy UTF-8.
    pub fn cstring(&mut self) -> Result<String, ProtoError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtoError::UnterminatedString)?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    /// All bytes that have not been read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        self.pos = data.len();
        rest
    }
}

/// Append a NUL-terminated string.
pub fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Encode an IPv4 socket address as the 16-byte W3GS address blob.
pub fn put_sock_addr(buf: &mut Vec<u8>, addr: std::net::SocketAddrV4) {
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&addr.port().to_be_bytes());
    buf.extend_from_slice(&addr.ip().octets());
    buf.extend_from_slice(&[0u8; 8]);
}

/// Decode the 16-byte W3GS address blob, zero address if the family is unset.
pub fn get_sock_addr(cur: &mut Cursor) -> Result<std::net::SocketAddrV4, ProtoError> {
    let blob = cur.bytes(16)?;
    let port = u16::from_be_bytes([blob[2], blob[3]]);
    let ip = std::net::Ipv4Addr::new(blob[4], blob[5], blob[6], blob[7]);
    Ok(std::net::SocketAddrV4::new(ip, port))
}
