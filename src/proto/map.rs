use crate::proto::packet::RawPacket;
use crate::proto::{id, put_cstring, Cursor, ProtoError, MAP_PART_SIZE};

/// File size, CRC and SHA1 the joiner must verify against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapCheck<'a> {
    pub path: &'a str,
    pub size: u32,
    pub crc32: u32,
    pub sha1: [u8; 20],
}

impl MapCheck<'_> {
    pub const PACKET_TYPE_ID: u8 = id::MAPCHECK;

    pub fn encode(&self) -> RawPacket {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        put_cstring(&mut buf, self.path);
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        buf.extend_from_slice(&self.sha1);
        RawPacket::w3gs(Self::PACKET_TYPE_ID, buf)
    }
}

/// Client's report on its local map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSize {
    /// 1 when the client has the full file, 3 while downloading.
    pub size_flag: u8,
    pub map_size: u32,
}

impl MapSize {
    pub const PACKET_TYPE_ID: u8 = id::MAPSIZE;

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let _unknown = cur.u32()?;
        Ok(Self {
            size_flag: cur.u8()?,
            map_size: cur.u32()?,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(self.size_flag);
        buf.extend_from_slice(&self.map_size.to_le_bytes());
        buf
    }
}

/// Tell a client to begin downloading from the host.
pub fn start_download(from_uid: u8) -> RawPacket {
    let mut buf = Vec::with_capacity(5);
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.push(from_uid);
    RawPacket::w3gs(id::STARTDOWNLOAD, buf)
}

/// One map chunk.
///
/// `data` must be at most [`MAP_PART_SIZE`] bytes.
pub fn map_part(to_uid: u8, from_uid: u8, start_pos: u32, data: &[u8]) -> RawPacket {
    debug_assert!(data.len() <= MAP_PART_SIZE);
    let mut buf = Vec::with_capacity(14 + data.len());
    buf.push(to_uid);
    buf.push(from_uid);
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&start_pos.to_le_bytes());
    let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(data);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(data);
    RawPacket::w3gs(id::MAPPART, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_size_round_trip() {
        let ms = MapSize {
            size_flag: 1,
            map_size: 0x00200000,
        };
        assert_eq!(MapSize::decode(&ms.encode()).unwrap(), ms);
    }

    #[test]
    fn map_part_layout() {
        let chunk = vec![0x5A; 100];
        let packet = map_part(2, 1, 1442, &chunk);
        assert_eq!(packet.id, id::MAPPART);
        assert_eq!(packet.data[0], 2);
        assert_eq!(packet.data[1], 1);
        assert_eq!(
            u32::from_le_bytes(packet.data[6..10].try_into().unwrap()),
            1442
        );
        assert_eq!(&packet.data[14..], &chunk[..]);
    }

    #[test]
    fn map_check_contains_hashes() {
        let check = MapCheck {
            path: "Maps\\Download\\DotA.w3x",
            size: 8_000_000,
            crc32: 0x1234_5678,
            sha1: [7u8; 20],
        };
        let packet = check.encode();
        assert_eq!(packet.id, id::MAPCHECK);
        // Path, then size, crc32 and the 20 byte sha1 tail
        assert!(packet.data.ends_with(&[7u8; 20]));
    }
}
