use crate::proto::packet::RawPacket;
use crate::proto::{id, Cursor, ProtoError};

/// Immediate start signal, first half.
pub fn countdown_start() -> RawPacket {
    RawPacket::w3gs(id::COUNTDOWN_START, vec![])
}

/// Immediate start signal, second half.
pub fn countdown_end() -> RawPacket {
    RawPacket::w3gs(id::COUNTDOWN_END, vec![])
}

/// Another player finished loading.
pub fn game_loaded_others(uid: u8) -> RawPacket {
    RawPacket::w3gs(id::GAMELOADED_OTHERS, vec![uid])
}

/// A lagging player entry for the lag screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lagger {
    pub uid: u8,
    /// How long the player has been lagging, in milliseconds.
    pub lag_ms: u32,
}

/// Open the lag screen listing all laggers.
pub fn start_lag(laggers: &[Lagger]) -> RawPacket {
    let mut buf = Vec::with_capacity(1 + laggers.len() * 5);
    buf.push(laggers.len() as u8);
    for lagger in laggers {
        buf.push(lagger.uid);
        buf.extend_from_slice(&lagger.lag_ms.to_le_bytes());
    }
    RawPacket::w3gs(id::START_LAG, buf)
}

/// Remove one player from the lag screen.
pub fn stop_lag(lagger: Lagger) -> RawPacket {
    let mut buf = Vec::with_capacity(5);
    buf.push(lagger.uid);
    buf.extend_from_slice(&lagger.lag_ms.to_le_bytes());
    RawPacket::w3gs(id::STOP_LAG, buf)
}

/// Decode a lag screen packet, used by tests and trace tooling.
pub fn decode_start_lag(data: &[u8]) -> Result<Vec<Lagger>, ProtoError> {
    let mut cur = Cursor::new(data);
    let count = cur.u8()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(Lagger {
            uid: cur.u8()?,
            lag_ms: cur.u32()?,
        });
    }
    Ok(out)
}
