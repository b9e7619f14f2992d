use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::packet::PacketType;

/// Why a datagram was not accepted. None of these stop a transfer: the
/// packet is dropped and retransmission recovers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram of {len} bytes is shorter than the 9-byte header")]
    TooShort { len: usize },

    #[error("declared payload length {declared} exceeds the {available} bytes present")]
    LengthMismatch { declared: usize, available: usize },

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLarge(usize),

    #[error("checksum mismatch: wire {wire:#06x}, computed {computed:#06x}")]
    Corrupted { wire: u16, computed: u16 },

    #[error("unexpected {kind:?} packet with seq {seq}")]
    UnexpectedType { kind: PacketType, seq: i32 },

    #[error("malformed metadata payload: {0}")]
    MalformedMetadata(&'static str),
}

/// Errors that end a send or receive.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to bind UDP socket on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to build packet: {0}")]
    Packet(#[from] PacketError),

    #[error("metadata payload of {size} bytes exceeds the {max}-byte packet limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("file needs {chunks} chunks, more than 32-bit sequence numbers allow")]
    FileTooLarge { chunks: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("seq {seq} was retransmitted {attempts} times without an ack")]
    RetransmitLimit { seq: i32, attempts: u32 },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("failed to read {}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to store {name}")]
    Storage {
        name: String,
        #[source]
        source: io::Error,
    },
}
