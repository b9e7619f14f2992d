//! NetViz transfer: reliable, in-order file transfer over UDP.
//!
//! - 9-byte framed packets with a payload checksum
//! - Sliding window with cumulative acks and per-packet retransmission timers
//! - Sender: main send/timeout loop + ack listener + optional control listener
//! - Receiver: reorder buffer, cumulative acks, reassembly after FIN
//! - Telemetry events to a pluggable [`EventSink`]

pub mod config;
pub mod control;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod stats;
pub mod storage;
pub mod telemetry;
pub mod window;

// Re-export key types for convenience.
pub use config::{ReceiverConfig, SenderConfig};
pub use control::{ControlListener, LossSimulator};
pub use error::{PacketError, TransferError};
pub use packet::{Metadata, Packet, PacketType, FIN_SEQ, HEADER_SIZE, MAX_PAYLOAD, METADATA_SEQ};
pub use receiver::{ReceiveResult, ReceiveSession, Receiver, ReceiverHandle};
pub use sender::{SendResult, Sender, SenderHandle};
pub use stats::TransferStats;
pub use storage::FileStore;
pub use telemetry::{ChannelSink, EventSink, FanoutSink, NullSink, TracingSink, UdpEventSink};
pub use window::WindowManager;

pub use netviz_types::{ControlCommand, EventRecord, TransferEvent};
