use crate::proto::packet::RawPacket;
use crate::proto::{id, Cursor, ProtoError, MAX_ACTION_BATCH, MAX_ACTION_SIZE};

/// One queued game action, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub uid: u8,
    pub data: Vec<u8>,
}

impl Action {
    /// An empty action for the given player.
    ///
    /// Keeps clients alive through lag screens and reconnect gaps.
    pub fn empty(uid: u8) -> Self {
        Self { uid, data: vec![] }
    }

    /// Wire size inside an action batch.
    fn wire_len(&self) -> usize {
        3 + self.data.len()
    }
}

/// Per-tick action batch from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAction {
    pub crc: u32,
    pub data: Vec<u8>,
}

impl OutgoingAction {
    pub const PACKET_TYPE_ID: u8 = id::OUTGOING_ACTION;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let crc = cur.u32()?;
        let payload = cur.rest().to_vec();
        if payload.len() > MAX_ACTION_SIZE {
            return Err(ProtoError::OversizedAction(payload.len()));
        }
        Ok(Self { crc, data: payload })
    }
}

/// Per-tick checksum from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingKeepalive {
    pub checksum: u32,
}

impl OutgoingKeepalive {
    pub const PACKET_TYPE_ID: u8 = id::OUTGOING_KEEPALIVE;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let _unknown = cur.u8()?;
        Ok(Self {
            checksum: cur.u32()?,
        })
    }
}

fn encode_batch(actions: &[Action]) -> Vec<u8> {
    let mut buf = Vec::new();
    for action in actions {
        buf.push(action.uid);
        buf.extend_from_slice(&(action.data.len() as u16).to_le_bytes());
        buf.extend_from_slice(&action.data);
    }
    buf
}

/// Broadcast action batch carrying the tick latency.
pub fn incoming_action(actions: &[Action], send_interval: u16) -> RawPacket {
    let mut buf = Vec::with_capacity(2 + actions.iter().map(Action::wire_len).sum::<usize>());
    buf.extend_from_slice(&send_interval.to_le_bytes());
    buf.extend_from_slice(&encode_batch(actions));
    RawPacket::w3gs(id::INCOMING_ACTION, buf)
}

/// Oversize spill batch; must precede its paired `INCOMING_ACTION`.
pub fn incoming_action2(actions: &[Action]) -> RawPacket {
    let mut buf = Vec::with_capacity(2 + actions.iter().map(Action::wire_len).sum::<usize>());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&encode_batch(actions));
    RawPacket::w3gs(id::INCOMING_ACTION2, buf)
}

/// Split queued actions into wire frames.
///
/// Whenever adding the next action would push the batch past
/// [`MAX_ACTION_BATCH`] payload bytes, the buffered actions spill into an
/// `INCOMING_ACTION2`; the final frame is always the `INCOMING_ACTION` that
/// carries the tick latency.
pub fn fragment_actions(actions: &[Action], send_interval: u16) -> Vec<RawPacket> {
    let mut frames = Vec::new();
    let mut batch: Vec<Action> = Vec::new();
    let mut batch_len = 0usize;

    for action in actions {
        if batch_len + action.wire_len() > MAX_ACTION_BATCH && !batch.is_empty() {
            frames.push(incoming_action2(&batch));
            batch.clear();
            batch_len = 0;
        }
        batch_len += action.wire_len();
        batch.push(action.clone());
    }

    frames.push(incoming_action(&batch, send_interval));
    frames
}
