//! Sender: chunks a payload, streams it under the sliding window, retransmits
//! on timeout and closes with FIN.
//!
//! Threads:
//!   1. Main loop (caller's thread): admit new DATA, scan timeouts, pace
//!   2. Ack listener: decode ACKs from the shared socket into the window
//!   3. Control listener (optional): SET_WINDOW / SET_LOSS from the UI

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use netviz_types::TransferEvent;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SenderConfig;
use crate::control::{ControlListener, LossSimulator};
use crate::error::{PacketError, TransferError};
use crate::packet::{Metadata, Packet, PacketType, FIN_SEQ, MAX_DATAGRAM, MAX_PAYLOAD, METADATA_SEQ};
use crate::socket;
use crate::stats::TransferStats;
use crate::storage::{read_source, sha256_hex};
use crate::telemetry::EventSink;
use crate::window::WindowManager;

/// Transfer result.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub file_name: String,
    pub total_bytes: u64,
    /// Chunks sent, METADATA included.
    pub total_packets: u64,
    pub retransmits: u64,
    pub elapsed: Duration,
    /// The receiver confirmed FIN before the sender gave up waiting.
    pub fin_acked: bool,
    pub sha256: String,
}

/// Cancels a running [`Sender`] from another thread.
#[derive(Clone)]
pub struct SenderHandle {
    cancelled: Arc<AtomicBool>,
}

impl SenderHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

pub struct Sender {
    config: SenderConfig,
    socket: Arc<UdpSocket>,
    window: Arc<WindowManager>,
    loss: Arc<LossSimulator>,
    stats: Arc<TransferStats>,
    events: Arc<dyn EventSink>,
    control: Option<ControlListener>,
    control_addr: Option<SocketAddr>,
    cancelled: Arc<AtomicBool>,
    /// Set by the ack listener when its socket fails for good.
    ack_failure: Arc<Mutex<Option<io::Error>>>,
}

impl Sender {
    /// Bind an ephemeral socket towards `config.receiver_addr` and, if
    /// configured, the control listener.
    pub fn bind(config: SenderConfig, events: Arc<dyn EventSink>) -> Result<Self, TransferError> {
        if config.chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunk size must be at least 1 byte"));
        }

        let local = socket::ephemeral_for(config.receiver_addr);
        let socket = socket::bind_udp(local).map_err(|source| TransferError::Bind { addr: local, source })?;

        let control = config.control_addr.map(ControlListener::bind).transpose()?;
        let control_addr = match &control {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };

        Ok(Self {
            window: Arc::new(WindowManager::new(config.initial_window_size, METADATA_SEQ, events.clone())),
            loss: Arc::new(LossSimulator::new(config.loss_chance)),
            stats: Arc::new(TransferStats::new()),
            socket: Arc::new(socket),
            events,
            control,
            control_addr,
            cancelled: Arc::new(AtomicBool::new(false)),
            ack_failure: Arc::new(Mutex::new(None)),
            config,
        })
    }

    pub fn window(&self) -> &Arc<WindowManager> {
        &self.window
    }

    pub fn loss(&self) -> &Arc<LossSimulator> {
        &self.loss
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Bound address of the control listener, if one is enabled.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    pub fn handle(&self) -> SenderHandle {
        SenderHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Read `path` and send it under its basename.
    pub fn send_file(self, path: &Path) -> Result<SendResult, TransferError> {
        let source = read_source(path).map_err(|source| TransferError::Source {
            path: path.to_path_buf(),
            source,
        })?;
        self.send_bytes(&source.name, &source.data)
    }

    /// Run a full transfer of `data` named `name`. Blocks until FIN has been
    /// sent, the transfer is cancelled, or a seq exhausts its retransmissions.
    pub fn send_bytes(mut self, name: &str, data: &[u8]) -> Result<SendResult, TransferError> {
        let chunk_size = self.config.chunk_size;
        let metadata_len = Metadata::encoded_len(name.len(), chunk_size);
        if metadata_len > MAX_PAYLOAD {
            return Err(TransferError::PayloadTooLarge {
                size: metadata_len,
                max: MAX_PAYLOAD,
            });
        }
        // An empty file still needs its METADATA acknowledged
        let chunks = data.len().div_ceil(chunk_size).max(1);
        if i32::try_from(chunks - 1).is_err() {
            return Err(TransferError::FileTooLarge { chunks });
        }

        let sha256 = sha256_hex(data);
        let data = Bytes::copy_from_slice(data);
        self.stats.set_total(data.len() as u64, chunks as u64);
        info!(
            "Sending {} ({} bytes, {} chunks) to {}",
            name,
            data.len(),
            chunks,
            self.config.receiver_addr
        );

        let running = Arc::new(AtomicBool::new(true));
        let fin_acked = Arc::new(AtomicBool::new(false));

        let control_thread = match self.control.take() {
            Some(listener) => Some(listener.spawn(self.window.clone(), self.loss.clone(), running.clone())?),
            None => None,
        };
        let ack_thread = {
            let socket = self.socket.clone();
            let window = self.window.clone();
            let events = self.events.clone();
            let running = running.clone();
            let fin_acked = fin_acked.clone();
            let failure = self.ack_failure.clone();
            thread::Builder::new().name("netviz-acks".into()).spawn(move || {
                let recv = |buf: &mut [u8]| socket.recv_from(buf);
                if let Err(e) = ack_loop(recv, &window, events.as_ref(), &running, &fin_acked) {
                    error!("Ack listener stopped: {}", e);
                    *failure.lock() = Some(e);
                }
            })
        };
        let ack_thread = match ack_thread {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        let start = Instant::now();
        let outcome = self.stream(name, &data, chunks).and_then(|()| self.finish(&fin_acked));

        running.store(false, Ordering::Release);
        if ack_thread.join().is_err() {
            error!("Ack listener panicked");
        }
        if let Some(handle) = control_thread {
            if handle.join().is_err() {
                error!("Control listener panicked");
            }
        }

        let fin_acked = outcome?;
        let result = SendResult {
            file_name: name.to_string(),
            total_bytes: data.len() as u64,
            total_packets: chunks as u64,
            retransmits: self.stats.retransmit_count(),
            elapsed: start.elapsed(),
            fin_acked,
            sha256,
        };
        info!(
            "Sent {} in {:.2?}: {} packets, {} retransmits, sha256 {}",
            result.file_name, result.elapsed, result.total_packets, result.retransmits, result.sha256
        );
        Ok(result)
    }

    /// METADATA, then DATA under the window until every chunk is acked.
    fn stream(&self, name: &str, data: &Bytes, chunks: usize) -> Result<(), TransferError> {
        let chunk_size = self.config.chunk_size;
        let first = data.slice(..data.len().min(chunk_size));
        let metadata = Metadata {
            file_name: name.to_string(),
            file_size: data.len() as u64,
            first_chunk: first.clone(),
        };
        let packet = Packet::metadata(&metadata)?;
        self.send_new(METADATA_SEQ, packet.encode(), first.len());

        let mut next = 1usize;
        let mut attempts: HashMap<i32, u32> = HashMap::new();
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                info!("Transfer cancelled");
                return Err(TransferError::Cancelled);
            }
            self.check_ack_listener()?;

            // chunks - 1 fits i32, checked by the caller
            while next < chunks && self.window.can_send(next as i32) {
                let offset = next * chunk_size;
                let chunk = data.slice(offset..data.len().min(offset + chunk_size));
                let packet = Packet::data(next as i32, chunk)?;
                self.send_new(next as i32, packet.encode(), packet.payload.len());
                next += 1;
            }

            if next >= chunks && self.window.is_idle() {
                return Ok(());
            }

            self.check_timeouts(&mut attempts)?;
            thread::sleep(self.config.pacing);
        }
    }

    /// First transmission of `seq`.
    fn send_new(&self, seq: i32, wire: Bytes, chunk_len: usize) {
        let (window_start, window_end) = self.window.bounds();
        self.window.record_sent(seq, wire.clone());
        self.transmit(seq, &wire);
        self.stats.record_chunk(chunk_len as u64);
        self.events.emit(TransferEvent::PacketSent {
            seq,
            window_start,
            window_end,
        });
    }

    /// Put `wire` on the socket unless the loss simulator eats it.
    fn transmit(&self, seq: i32, wire: &[u8]) {
        if self.loss.should_drop() {
            debug!(seq, "simulated loss, packet not sent");
            return;
        }
        if let Err(e) = self.socket.send_to(wire, self.config.receiver_addr) {
            // Still recorded as sent, so the timeout scan retries it
            warn!(seq, "send failed: {}", e);
        }
    }

    /// Retransmit every unacked seq whose timer expired.
    fn check_timeouts(&self, attempts: &mut HashMap<i32, u32>) -> Result<(), TransferError> {
        let window_start = self.window.window_start();
        attempts.retain(|&seq, _| seq >= window_start);

        let now = Instant::now();
        for seq in self.window.unacked_seqs() {
            let Some(sent_at) = self.window.get_last_send_time(seq) else {
                continue;
            };
            if now.duration_since(sent_at) < self.config.timeout {
                continue;
            }
            // Acked between the snapshot and here
            let Some(wire) = self.window.get_packet(seq) else {
                continue;
            };

            let count = attempts.entry(seq).or_insert(0);
            if self.config.max_retransmits.is_some_and(|max| *count >= max) {
                error!(seq, "giving up after {} retransmissions", count);
                return Err(TransferError::RetransmitLimit { seq, attempts: *count });
            }
            *count += 1;

            self.stats.record_timeout();
            self.events.emit(TransferEvent::Timeout { seq });
            debug!(seq, attempt = *count, "timeout, retransmitting");

            self.transmit(seq, &wire);
            self.window.update_send_timestamp(seq);
            self.stats.record_retransmit();
            self.events.emit(TransferEvent::Retransmit { seq });
        }
        Ok(())
    }

    /// Without the ack listener nothing can ever be acked again.
    fn check_ack_listener(&self) -> Result<(), TransferError> {
        match self.ack_failure.lock().take() {
            Some(e) => Err(TransferError::Io(e)),
            None => Ok(()),
        }
    }

    /// Send FIN, resending while no FIN-ack arrives. Returns whether one did.
    fn finish(&self, fin_acked: &AtomicBool) -> Result<bool, TransferError> {
        let fin = Packet::fin().encode();
        let poll = self.config.pacing.max(Duration::from_millis(1));

        for attempt in 1..=self.config.fin_attempts.max(1) {
            // FIN bypasses the loss simulator
            if let Err(e) = self.socket.send_to(&fin, self.config.receiver_addr) {
                warn!("FIN send failed: {}", e);
            }
            if attempt == 1 {
                info!("All chunks acknowledged, FIN sent");
            } else {
                debug!(attempt, "FIN resent");
            }

            let deadline = Instant::now() + self.config.fin_timeout;
            while Instant::now() < deadline {
                if fin_acked.load(Ordering::Acquire) {
                    return Ok(true);
                }
                self.check_ack_listener()?;
                thread::sleep(poll);
            }
        }

        let acked = fin_acked.load(Ordering::Acquire);
        if !acked {
            warn!("No FIN-ack after {} attempts, finishing anyway", self.config.fin_attempts.max(1));
        }
        Ok(acked)
    }
}

/// Feed datagrams from `recv` into the window until `running` clears.
/// Returns the error that made the socket unusable, if any.
fn ack_loop(
    mut recv: impl FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
    window: &WindowManager,
    events: &dyn EventSink,
    running: &AtomicBool,
    fin_acked: &AtomicBool,
) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        match recv(&mut buf) {
            Ok((len, from)) => {
                if let Err(e) = handle_ack(&buf[..len], window, events, fin_acked) {
                    debug!(%from, "ignoring datagram: {}", e);
                }
            }
            Err(ref e) if socket::is_poll_timeout(e) => continue,
            Err(ref e) if socket::is_transient(e) => {
                debug!("ack receive: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Apply one datagram from the receiver. Anything other than a valid ACK is rejected.
pub fn handle_ack(
    datagram: &[u8],
    window: &WindowManager,
    events: &dyn EventSink,
    fin_acked: &AtomicBool,
) -> Result<(), PacketError> {
    let packet = Packet::decode(datagram)?.validated()?;
    if packet.kind != PacketType::Ack {
        return Err(PacketError::UnexpectedType {
            kind: packet.kind,
            seq: packet.seq,
        });
    }

    events.emit(TransferEvent::AckReceived { ack: packet.seq });
    if packet.seq == FIN_SEQ {
        if !fin_acked.swap(true, Ordering::AcqRel) {
            info!("FIN acknowledged by receiver");
        }
    } else {
        window.record_ack(packet.seq);
    }
    Ok(())
}
