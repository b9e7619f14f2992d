//! Event sinks for the telemetry sidecar.
//!
//! Engines call [`EventSink::emit`] synchronously from whichever thread
//! produced the event, so implementations must never block the data plane.
//! Delivery is best-effort.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use netviz_types::{EventRecord, TransferEvent};

use crate::socket;

/// Default local port of the telemetry sidecar.
pub const DEFAULT_EVENT_PORT: u16 = 5000;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

/// Sends one JSON record per datagram to a local collector.
pub struct UdpEventSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpEventSink {
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(socket::ephemeral_for(target))?;
        // A full send buffer drops the record instead of stalling the sender.
        socket.set_nonblocking(true)?;
        Ok(Self { socket, target })
    }

    /// Sink aimed at the sidecar on `127.0.0.1:port`.
    pub fn localhost(port: u16) -> io::Result<Self> {
        Self::new((Ipv4Addr::LOCALHOST, port).into())
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl EventSink for UdpEventSink {
    fn emit(&self, event: TransferEvent) {
        let json = match EventRecord::now(event).to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::trace!("event serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(json.as_bytes(), self.target) {
            tracing::trace!(target_addr = %self.target, "event dropped: {}", e);
        }
    }
}

/// Writes events to the `tracing` log at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TransferEvent) {
        tracing::debug!(event = event.kind(), "{}", event);
    }
}

/// Forwards timestamped records into a bounded channel. Records are dropped
/// when the channel is full or its receiver is gone.
pub struct ChannelSink {
    tx: Sender<EventRecord>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<EventRecord>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TransferEvent) {
        match self.tx.try_send(EventRecord::now(event)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(record)) => {
                tracing::trace!(event = record.event.kind(), "event channel full, record dropped");
            }
        }
    }
}

/// Clones every event to each inner sink.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: TransferEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Discards all events.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TransferEvent) {}
}
