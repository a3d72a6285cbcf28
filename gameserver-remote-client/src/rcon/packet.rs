use crate::ErrorKind;
use byteorder::{ByteOrder, LittleEndian};

pub(crate) const SERVERDATA_AUTH: i32 = 3;
pub(crate) const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub(crate) const SERVERDATA_EXECCOMMAND: i32 = 2;
pub(crate) const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request ID echoed by the server when the password is wrong.
pub(crate) const AUTH_FAILED_ID: i32 = -1;

/// Length of the size prefix, which is not counted in the size itself.
pub(crate) const SIZE_FIELD_LEN: usize = 4;

// id + type + two trailing NULs
const MIN_PACKET_SIZE: usize = 10;
const MAX_PACKET_SIZE: usize = 4096;

/// One Source RCON packet: `size | id | type | body | 0x00 0x00`, little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<Vec<u8>>) -> Self {
        Packet {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        let size = MIN_PACKET_SIZE + self.body.len();
        if size > MAX_PACKET_SIZE {
            return Err(ErrorKind::InvalidPacket("outgoing packet exceeds 4096 bytes").into());
        }

        let mut buf = Vec::with_capacity(SIZE_FIELD_LEN + size);
        buf.extend_from_slice(&(size as i32).to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(&self.body);
        buf.extend_from_slice(&[0, 0]);
        Ok(buf)
    }

    /// Validates the size prefix and returns how many bytes follow it.
    ///
    /// This runs before anything is allocated for the rest of the packet, so a peer cannot make us
    /// reserve more than [`MAX_PACKET_SIZE`] bytes.
    pub fn decode_size(size_field: &[u8; SIZE_FIELD_LEN]) -> crate::Result<usize> {
        let size = LittleEndian::read_i32(size_field);
        if size < MIN_PACKET_SIZE as i32 {
            return Err(ErrorKind::InvalidPacket("packet size below 10 bytes").into());
        }
        if size > MAX_PACKET_SIZE as i32 {
            return Err(ErrorKind::InvalidPacket("packet size above 4096 bytes").into());
        }
        Ok(size as usize)
    }

    /// Decodes everything after the size prefix.
    pub fn decode(payload: &[u8]) -> crate::Result<Self> {
        if payload.len() < MIN_PACKET_SIZE {
            return Err(ErrorKind::InvalidPacket("truncated packet").into());
        }

        let (body, terminator) = payload[8..].split_at(payload.len() - 10);
        if terminator != [0, 0] {
            return Err(ErrorKind::InvalidPacket("missing packet terminator").into());
        }

        Ok(Packet {
            id: LittleEndian::read_i32(&payload[0..4]),
            kind: LittleEndian::read_i32(&payload[4..8]),
            body: body.to_vec(),
        })
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
