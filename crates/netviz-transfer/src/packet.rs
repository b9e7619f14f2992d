//! Wire packet format and the metadata sub-record.
//!
//! ```text
//! [0]      Type (u8): 0 DATA, 1 METADATA, 2 ACK, 3 FIN
//! [1..5]   Sequence number (i32 BE)
//! [5..7]   Payload length (u16 BE)
//! [7..9]   Checksum (u16 BE), byte sum of the payload mod 65535
//! [9..]    Payload
//! ```
//!
//! METADATA is always seq 0, FIN is always seq -1 with an empty payload,
//! ACK carries the highest contiguously received seq (-1 acknowledges FIN).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 9;

/// Largest payload the length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Largest datagram a peer can legitimately send.
pub const MAX_DATAGRAM: usize = HEADER_SIZE + MAX_PAYLOAD;

pub const METADATA_SEQ: i32 = 0;
pub const FIN_SEQ: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Metadata = 1,
    Ack = 2,
    Fin = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Metadata),
            2 => Ok(Self::Ack),
            3 => Ok(Self::Fin),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

/// Byte sum of `payload` reduced modulo 65535. Not cryptographic.
pub fn compute_checksum(payload: &[u8]) -> u16 {
    let sum: u32 = payload.iter().map(|&b| u32::from(b)).sum();
    (sum % 65_535) as u16
}

/// One protocol packet.
///
/// `checksum` is whatever the wire carried; use [`Packet::is_valid`] to
/// check it against the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub seq: i32,
    pub checksum: u16,
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet with a freshly computed checksum.
    pub fn new(kind: PacketType, seq: i32, payload: Bytes) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            kind,
            seq,
            checksum: compute_checksum(&payload),
            payload,
        })
    }

    pub fn data(seq: i32, payload: Bytes) -> Result<Self, PacketError> {
        Self::new(PacketType::Data, seq, payload)
    }

    pub fn metadata(meta: &Metadata) -> Result<Self, PacketError> {
        Self::new(PacketType::Metadata, METADATA_SEQ, meta.encode())
    }

    pub fn ack(seq: i32) -> Self {
        Self {
            kind: PacketType::Ack,
            seq,
            checksum: 0,
            payload: Bytes::new(),
        }
    }

    pub fn fin() -> Self {
        Self {
            kind: PacketType::Fin,
            seq: FIN_SEQ,
            checksum: 0,
            payload: Bytes::new(),
        }
    }

    pub fn payload_len(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Recompute the payload checksum and compare with the carried one.
    pub fn is_valid(&self) -> bool {
        self.checksum == compute_checksum(&self.payload)
    }

    /// Pass the packet through if its checksum holds.
    pub fn validated(self) -> Result<Self, PacketError> {
        let computed = compute_checksum(&self.payload);
        if computed == self.checksum {
            Ok(self)
        } else {
            Err(PacketError::Corrupted {
                wire: self.checksum,
                computed,
            })
        }
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_i32(self.seq);
        buf.put_u16(self.payload_len());
        buf.put_u16(self.checksum);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse from wire format. Bytes past the declared payload are ignored.
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_SIZE {
            return Err(PacketError::TooShort { len: datagram.len() });
        }
        let mut buf = datagram;
        let type_byte = buf.get_u8();
        let seq = buf.get_i32();
        let declared = buf.get_u16() as usize;
        let checksum = buf.get_u16();

        if declared > buf.remaining() {
            return Err(PacketError::LengthMismatch {
                declared,
                available: buf.remaining(),
            });
        }
        let kind = PacketType::try_from(type_byte)?;

        Ok(Self {
            kind,
            seq,
            checksum,
            payload: Bytes::copy_from_slice(&buf[..declared]),
        })
    }
}

/// Contents of the METADATA payload.
///
/// ```text
/// [0..4]        Name length (u32 BE)
/// [4..4+n]      File name (UTF-8)
/// [4+n..12+n]   File size (u64 BE)
/// [12+n..]      First data chunk
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_name: String,
    pub file_size: u64,
    pub first_chunk: Bytes,
}

impl Metadata {
    /// Bytes taken by the length, name and size fields, excluding the name itself.
    pub const FIXED_LEN: usize = 4 + 8;

    /// Encoded payload length for a name of `name_len` bytes carrying `chunk_len` bytes of data.
    pub fn encoded_len(name_len: usize, chunk_len: usize) -> usize {
        Self::FIXED_LEN + name_len + chunk_len
    }

    pub fn encode(&self) -> Bytes {
        let name = self.file_name.as_bytes();
        let mut buf = BytesMut::with_capacity(Self::encoded_len(name.len(), self.first_chunk.len()));
        buf.put_u32(name.len() as u32);
        buf.put_slice(name);
        buf.put_u64(self.file_size);
        buf.put_slice(&self.first_chunk);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, PacketError> {
        let mut buf = payload.clone();
        if buf.remaining() < 4 {
            return Err(PacketError::MalformedMetadata("missing name length"));
        }
        let name_len = buf.get_u32() as usize;
        if buf.remaining() < name_len.saturating_add(8) {
            return Err(PacketError::MalformedMetadata("name length exceeds payload"));
        }
        let name = buf.split_to(name_len);
        let file_name = std::str::from_utf8(&name)
            .map_err(|_| PacketError::MalformedMetadata("file name is not UTF-8"))?
            .to_string();
        let file_size = buf.get_u64();

        Ok(Self {
            file_name,
            file_size,
            first_chunk: buf,
        })
    }
}
