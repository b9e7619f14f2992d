//! Shared helpers for the loopback tests: a fault-injecting UDP relay that
//! sits between sender and receiver, plus file and engine setup.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use netviz_transfer::packet::{HEADER_SIZE, MAX_DATAGRAM};
use netviz_transfer::{
    EventSink, NullSink, Packet, PacketType, ReceiveResult, Receiver, ReceiverConfig, SenderConfig,
    TransferError,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("netviz_transfer=debug")
        .try_init();
}

/// Deterministic test content.
pub fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Fresh, empty directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("netviz_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Settings used by the end-to-end scenarios.
pub fn sender_config(target: SocketAddr) -> SenderConfig {
    SenderConfig {
        receiver_addr: target,
        initial_window_size: 4,
        chunk_size: 1024,
        timeout: Duration::from_millis(100),
        ..SenderConfig::default()
    }
}

/// Bind a loopback receiver writing into `dir` and run it on its own thread.
pub fn spawn_receiver(
    dir: &Path,
    events: Arc<dyn EventSink>,
) -> (SocketAddr, JoinHandle<Result<ReceiveResult, TransferError>>) {
    let config = ReceiverConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        output_dir: dir.to_path_buf(),
        ..ReceiverConfig::default()
    };
    let receiver = Receiver::bind(config, events).unwrap();
    let addr = receiver.local_addr().unwrap();
    (addr, thread::spawn(move || receiver.run()))
}

pub fn spawn_quiet_receiver(dir: &Path) -> (SocketAddr, JoinHandle<Result<ReceiveResult, TransferError>>) {
    spawn_receiver(dir, Arc::new(NullSink))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToReceiver,
    ToSender,
}

/// What the relay does with one datagram.
pub enum Verdict {
    Forward,
    Drop,
    /// Delay until the next datagram in the same direction is forwarded.
    Hold,
    /// Forward these bytes instead.
    Replace(Vec<u8>),
}

/// A datagram the relay saw, before its verdict was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seen {
    pub direction: Direction,
    pub kind: PacketType,
    pub seq: i32,
}

/// `packet` with one payload byte flipped, or its checksum if it has no payload.
pub fn corrupt(packet: &Packet) -> Vec<u8> {
    let mut wire = packet.encode().to_vec();
    if packet.payload.is_empty() {
        wire[7] ^= 0xFF;
    } else {
        wire[HEADER_SIZE] ^= 0xFF;
    }
    wire
}

/// Rule deciding each datagram's fate. The count is how many times this
/// (direction, kind, seq) has been seen, starting at 1.
pub type Rule = Box<dyn FnMut(Direction, &Packet, usize) -> Verdict + Send>;

pub struct Relay {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<Seen>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    /// Relay towards `receiver`. The sender is whoever sends first from another address.
    pub fn start(receiver: SocketAddr, rule: Rule) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let addr = socket.local_addr().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let seen = seen.clone();
            let running = running.clone();
            thread::spawn(move || relay_loop(socket, receiver, rule, &seen, &running))
        };

        Self {
            addr,
            seen,
            running,
            handle: Some(handle),
        }
    }

    pub fn forwarding(receiver: SocketAddr) -> Self {
        Self::start(receiver, Box::new(|_, _, _| Verdict::Forward))
    }

    /// Where the sender should send.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    /// `(kind, seq)` of every datagram seen travelling in `direction`.
    pub fn seen_towards(&self, direction: Direction) -> Vec<(PacketType, i32)> {
        self.seen
            .lock()
            .iter()
            .filter(|s| s.direction == direction)
            .map(|s| (s.kind, s.seq))
            .collect()
    }

    /// Seqs of ACKs seen heading to the sender.
    pub fn acks(&self) -> Vec<i32> {
        self.seen_towards(Direction::ToSender)
            .into_iter()
            .filter(|(kind, _)| *kind == PacketType::Ack)
            .map(|(_, seq)| seq)
            .collect()
    }

    pub fn count(&self, direction: Direction, kind: PacketType, seq: i32) -> usize {
        self.seen_towards(direction)
            .into_iter()
            .filter(|&(k, s)| k == kind && s == seq)
            .count()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn relay_loop(
    socket: UdpSocket,
    receiver: SocketAddr,
    mut rule: Rule,
    seen: &Mutex<Vec<Seen>>,
    running: &AtomicBool,
) {
    let mut sender: Option<SocketAddr> = None;
    let mut counts: HashMap<(Direction, PacketType, i32), usize> = HashMap::new();
    let mut held: Vec<(Direction, Vec<u8>, SocketAddr)> = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let release = |held: &mut Vec<(Direction, Vec<u8>, SocketAddr)>, direction: Option<Direction>| {
        held.retain(|(dir, wire, to)| {
            if direction.is_none_or(|d| d == *dir) {
                let _ = socket.send_to(wire, to);
                false
            } else {
                true
            }
        });
    };

    while running.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => {
                // Idle: nothing will overtake the held datagrams any more
                release(&mut held, None);
                continue;
            }
        };
        let wire = buf[..len].to_vec();

        let (direction, to) = if from == receiver {
            match sender {
                Some(sender) => (Direction::ToSender, sender),
                None => continue,
            }
        } else {
            sender = Some(from);
            (Direction::ToReceiver, receiver)
        };

        let verdict = match Packet::decode(&wire) {
            Ok(packet) => {
                seen.lock().push(Seen {
                    direction,
                    kind: packet.kind,
                    seq: packet.seq,
                });
                let count = counts.entry((direction, packet.kind, packet.seq)).or_insert(0);
                *count += 1;
                rule(direction, &packet, *count)
            }
            Err(_) => Verdict::Forward,
        };

        match verdict {
            Verdict::Forward => {
                let _ = socket.send_to(&wire, to);
                release(&mut held, Some(direction));
            }
            Verdict::Replace(bytes) => {
                let _ = socket.send_to(&bytes, to);
                release(&mut held, Some(direction));
            }
            Verdict::Hold => held.push((direction, wire, to)),
            Verdict::Drop => {}
        }
    }
}
