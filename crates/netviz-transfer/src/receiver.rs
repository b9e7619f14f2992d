//! Receiver: validates datagrams, buffers out-of-order chunks, answers with
//! cumulative acks and writes the reassembled file after FIN.
//!
//! Per-packet logic lives in [`ReceiveSession`], which never touches a
//! socket. [`Receiver`] drives it from a bound UDP socket.

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use netviz_types::TransferEvent;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::error::{PacketError, TransferError};
use crate::packet::{Metadata, Packet, PacketType, FIN_SEQ, MAX_DATAGRAM, METADATA_SEQ};
use crate::socket;
use crate::stats::TransferStats;
use crate::storage::{sanitize_file_name, sha256_hex, FileStore};
use crate::telemetry::EventSink;

/// Reassembly state for one incoming transfer.
pub struct ReceiveSession {
    /// Lowest seq not yet received. Every seq below it is buffered.
    expected_seq: i32,
    buffer: BTreeMap<i32, Bytes>,
    file_name: Option<String>,
    expected_size: Option<u64>,
    received_bytes: u64,
    running: bool,
    events: Arc<dyn EventSink>,
    stats: Arc<TransferStats>,
}

impl ReceiveSession {
    pub fn new(events: Arc<dyn EventSink>, stats: Arc<TransferStats>) -> Self {
        Self {
            expected_seq: 0,
            buffer: BTreeMap::new(),
            file_name: None,
            expected_size: None,
            received_bytes: 0,
            running: true,
            events,
            stats,
        }
    }

    /// Apply one decoded packet and return the ack to send back, if any.
    ///
    /// Nothing is acked before chunk 0 has arrived, since the only ack below
    /// 0 is the FIN-ack. Errors mean the packet was dropped without effect.
    pub fn on_packet(&mut self, packet: Packet) -> Result<Option<Packet>, PacketError> {
        let packet = packet.validated()?;
        match (packet.kind, packet.seq) {
            (PacketType::Metadata, METADATA_SEQ) => {
                let metadata = Metadata::decode(&packet.payload)?;
                if self.file_name.is_none() {
                    info!("Receiving {} ({} bytes)", metadata.file_name, metadata.file_size);
                }
                self.file_name = Some(metadata.file_name);
                self.expected_size = Some(metadata.file_size);
                self.stats.set_total_bytes(metadata.file_size);
                self.events.emit(TransferEvent::PacketReceived { seq: METADATA_SEQ });
                self.store(METADATA_SEQ, metadata.first_chunk);
                Ok(self.cumulative_ack())
            }
            (PacketType::Data, seq) if seq > METADATA_SEQ => {
                self.events.emit(TransferEvent::PacketReceived { seq });
                self.store(seq, packet.payload);
                Ok(self.cumulative_ack())
            }
            (PacketType::Fin, FIN_SEQ) => {
                if self.running {
                    info!("FIN received");
                } else {
                    debug!("duplicate FIN, re-acking");
                }
                self.running = false;
                Ok(Some(Packet::ack(FIN_SEQ)))
            }
            (kind, seq) => Err(PacketError::UnexpectedType { kind, seq }),
        }
    }

    /// Insert or overwrite a chunk, counting bytes only the first time.
    fn store(&mut self, seq: i32, payload: Bytes) {
        let len = payload.len() as u64;
        if self.buffer.insert(seq, payload).is_none() {
            self.received_bytes += len;
            self.stats.record_chunk(len);
        }
        while self.buffer.contains_key(&self.expected_seq) {
            self.expected_seq += 1;
        }
        if let Some(total) = self.expected_size {
            self.events.emit(TransferEvent::Progress {
                received: self.received_bytes,
                total,
            });
        }
    }

    fn cumulative_ack(&self) -> Option<Packet> {
        (self.expected_seq > 0).then(|| Packet::ack(self.expected_seq - 1))
    }

    /// `buffer[0] ‖ buffer[1] ‖ … ‖ buffer[expected_seq - 1]`.
    pub fn reassemble(&self) -> Vec<u8> {
        let chunks = self.buffer.range(..self.expected_seq).map(|(_, chunk)| chunk);
        let mut out = Vec::with_capacity(chunks.clone().map(Bytes::len).sum());
        for chunk in chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn expected_seq(&self) -> i32 {
        self.expected_seq
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// File size advertised in METADATA.
    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    /// Distinct payload bytes received, including chunks still out of order.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    /// False once FIN has been seen.
    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Outcome of a finished receive.
#[derive(Debug, Clone)]
pub struct ReceiveResult {
    /// Sanitized name the file was stored under; `None` if METADATA never arrived.
    pub file_name: Option<String>,
    pub path: Option<PathBuf>,
    pub bytes: u64,
    /// Size advertised in METADATA.
    pub expected_bytes: Option<u64>,
    /// Reassembled size matches the advertised size.
    pub complete: bool,
    pub elapsed: Duration,
    pub sha256: String,
    pub peer: Option<SocketAddr>,
}

/// Stops a running [`Receiver`] from another thread.
#[derive(Clone)]
pub struct ReceiverHandle {
    stop: Arc<AtomicBool>,
}

impl ReceiverHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub struct Receiver {
    socket: UdpSocket,
    config: ReceiverConfig,
    events: Arc<dyn EventSink>,
    stats: Arc<TransferStats>,
    stop: Arc<AtomicBool>,
}

impl Receiver {
    pub fn bind(config: ReceiverConfig, events: Arc<dyn EventSink>) -> Result<Self, TransferError> {
        let addr = config.listen_addr;
        let socket = socket::bind_udp(addr).map_err(|source| TransferError::Bind { addr, source })?;
        Ok(Self::with_socket(socket, config, events))
    }

    /// Use an already bound socket. `config.listen_addr` is ignored.
    pub fn from_socket(
        socket: UdpSocket,
        config: ReceiverConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, TransferError> {
        socket::configure(&socket)?;
        Ok(Self::with_socket(socket, config, events))
    }

    fn with_socket(socket: UdpSocket, config: ReceiverConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            socket,
            config,
            events,
            stats: Arc::new(TransferStats::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }

    pub fn handle(&self) -> ReceiverHandle {
        ReceiverHandle {
            stop: self.stop.clone(),
        }
    }

    /// Receive one transfer: run until FIN (plus linger), then write the file.
    pub fn run(self) -> Result<ReceiveResult, TransferError> {
        if let Ok(addr) = self.socket.local_addr() {
            info!("Receiver listening on {}", addr);
        }

        let mut session = ReceiveSession::new(self.events.clone(), self.stats.clone());
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut peer = None;
        let mut started = None;
        let mut linger_until: Option<Instant> = None;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("Receiver stopped before completion");
                return Err(TransferError::Cancelled);
            }
            if linger_until.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if let Some(kind) = self.handle_datagram(&mut session, &buf[..len], from) {
                        peer = Some(from);
                        started.get_or_insert_with(Instant::now);
                        if kind == PacketType::Fin {
                            linger_until = Some(Instant::now() + self.config.linger);
                        }
                    }
                }
                Err(ref e) if socket::is_poll_timeout(e) => {}
                Err(ref e) if socket::is_transient(e) => debug!("receive: {}", e),
                Err(e) => return Err(TransferError::Io(e)),
            }

            if !session.is_running() && self.config.linger.is_zero() {
                break;
            }
        }

        let elapsed = started.map(|t: Instant| t.elapsed()).unwrap_or_default();
        self.deliver(&session, peer, elapsed)
    }

    /// Feed one datagram to the session and send its ack. Returns the
    /// packet type if it was accepted.
    fn handle_datagram(
        &self,
        session: &mut ReceiveSession,
        datagram: &[u8],
        from: SocketAddr,
    ) -> Option<PacketType> {
        let (kind, reply) = match Packet::decode(datagram).and_then(|packet| {
            let kind = packet.kind;
            session.on_packet(packet).map(|reply| (kind, reply))
        }) {
            Ok(accepted) => accepted,
            Err(e @ PacketError::UnexpectedType { .. }) => {
                debug!(%from, "ignoring packet: {}", e);
                return None;
            }
            Err(e) => {
                debug!(%from, "dropping datagram: {}", e);
                self.stats.record_dropped();
                return None;
            }
        };

        if let Some(ack) = reply {
            match self.socket.send_to(&ack.encode(), from) {
                Ok(_) => self.events.emit(TransferEvent::AckSent { ack: ack.seq }),
                Err(e) => warn!(ack = ack.seq, "failed to send ack: {}", e),
            }
        }
        Some(kind)
    }

    fn deliver(
        &self,
        session: &ReceiveSession,
        peer: Option<SocketAddr>,
        elapsed: Duration,
    ) -> Result<ReceiveResult, TransferError> {
        let data = session.reassemble();
        let sha256 = sha256_hex(&data);
        let expected_bytes = session.expected_size();
        let complete = expected_bytes == Some(data.len() as u64);

        let Some(wire_name) = session.file_name() else {
            warn!("FIN arrived before METADATA, nothing written");
            return Ok(ReceiveResult {
                file_name: None,
                path: None,
                bytes: data.len() as u64,
                expected_bytes,
                complete: false,
                elapsed,
                sha256,
                peer,
            });
        };

        let name = sanitize_file_name(wire_name);
        if !complete {
            warn!(
                "{} is incomplete: {} of {} bytes reassembled",
                name,
                data.len(),
                expected_bytes.unwrap_or_default()
            );
        }

        let store = FileStore::new(&self.config.output_dir);
        let path = store.save(&name, &data).map_err(|source| TransferError::Storage {
            name: name.clone(),
            source,
        })?;
        self.events.emit(TransferEvent::FileComplete {
            name: name.clone(),
            size: data.len() as u64,
        });
        info!("Received {} ({} bytes, sha256 {}) in {:.2?}", name, data.len(), sha256, elapsed);

        Ok(ReceiveResult {
            file_name: Some(name),
            path: Some(path),
            bytes: data.len() as u64,
            expected_bytes,
            complete,
            elapsed,
            sha256,
            peer,
        })
    }
}
