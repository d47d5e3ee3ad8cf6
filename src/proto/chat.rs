use crate::proto::packet::RawPacket;
use crate::proto::{id, put_cstring, Cursor, ProtoError};

/// In-game chat recipient mask carried in the extra flags.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChatScope {
    All,
    Allies,
    Observers,
    /// Private message to the player holding this color.
    Private(u8),
}

impl ChatScope {
    pub fn to_u32(self) -> u32 {
        match self {
            Self::All => 0x00,
            Self::Allies => 0x01,
            Self::Observers => 0x02,
            Self::Private(color) => 0x03 + color as u32,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            0x00 => Self::All,
            0x01 => Self::Allies,
            0x02 => Self::Observers,
            v => Self::Private((v - 0x03) as u8),
        }
    }
}

/// What a `CHAT_TO_HOST` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRequest {
    /// Lobby chat line.
    Message(String),

    /// In-game chat line with a recipient scope.
    MessageExtra(ChatScope, String),

    /// Lobby settings change.
    TeamChange(u8),
    ColorChange(u8),
    RaceChange(u8),
    HandicapChange(u8),
}

/// Chat or settings-change packet from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatToHost {
    /// UIDs the client wants this delivered to.
    pub to_uids: Vec<u8>,
    pub from_uid: u8,
    pub request: ChatRequest,
}

impl ChatToHost {
    pub const PACKET_TYPE_ID: u8 = id::CHAT_TO_HOST;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let total = cur.u8()?;
        let mut to_uids = Vec::with_capacity(total as usize);
        for _ in 0..total {
            to_uids.push(cur.u8()?);
        }
        let from_uid = cur.u8()?;
        let flag = cur.u8()?;
        let request = match flag {
            0x10 => ChatRequest::Message(cur.cstring()?),
            0x11 => ChatRequest::TeamChange(cur.u8()?),
            0x12 => ChatRequest::ColorChange(cur.u8()?),
            0x13 => ChatRequest::RaceChange(cur.u8()?),
            0x14 => ChatRequest::HandicapChange(cur.u8()?),
            0x20 => {
                let scope = ChatScope::from_u32(cur.u32()?);
                ChatRequest::MessageExtra(scope, cur.cstring()?)
            }
            _ => return Err(ProtoError::Malformed("CHAT_TO_HOST")),
        };
        Ok(Self {
            to_uids,
            from_uid,
            request,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.to_uids.len() as u8);
        buf.extend_from_slice(&self.to_uids);
        buf.push(self.from_uid);
        match &self.request {
            ChatRequest::Message(text) => {
                buf.push(0x10);
                put_cstring(&mut buf, text);
            }
            ChatRequest::TeamChange(v) => {
                buf.push(0x11);
                buf.push(*v);
            }
            ChatRequest::ColorChange(v) => {
                buf.push(0x12);
                buf.push(*v);
            }
            ChatRequest::RaceChange(v) => {
                buf.push(0x13);
                buf.push(*v);
            }
            ChatRequest::HandicapChange(v) => {
                buf.push(0x14);
                buf.push(*v);
            }
            ChatRequest::MessageExtra(scope, text) => {
                buf.push(0x20);
                buf.extend_from_slice(&scope.to_u32().to_le_bytes());
                put_cstring(&mut buf, text);
            }
        }
        buf
    }
}

/// Text from the host to a set of recipients.
pub fn chat_from_host(from_uid: u8, to_uids: &[u8], text: &str) -> RawPacket {
    let mut buf = Vec::new();
    buf.push(to_uids.len() as u8);
    buf.extend_from_slice(to_uids);
    buf.push(from_uid);
    buf.push(0x10);
    put_cstring(&mut buf, text);
    RawPacket::w3gs(id::CHAT_FROM_HOST, buf)
}

/// In-game text from the host with a recipient scope.
pub fn chat_from_host_scoped(
    from_uid: u8,
    to_uids: &[u8],
    scope: ChatScope,
    text: &str,
) -> RawPacket {
    let mut buf = Vec::new();
    buf.push(to_uids.len() as u8);
    buf.extend_from_slice(to_uids);
    buf.push(from_uid);
    buf.push(0x20);
    buf.extend_from_slice(&scope.to_u32().to_le_bytes());
    put_cstring(&mut buf, text);
    RawPacket::w3gs(id::CHAT_FROM_HOST, buf)
}
