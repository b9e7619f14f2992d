use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Receiver port used when nothing else is configured.
pub const DEFAULT_RECEIVER_PORT: u16 = 6000;

/// Local control-intake port of the visualizer UI.
pub const DEFAULT_CONTROL_PORT: u16 = 5001;

pub const DEFAULT_WINDOW_SIZE: u32 = 20;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_PACING: Duration = Duration::from_millis(5);
pub const DEFAULT_FIN_ATTEMPTS: u32 = 3;
/// Wait for a FIN-ack before resending FIN. Shorter than [`DEFAULT_LINGER`]
/// so a resent FIN still finds the receiver listening.
pub const DEFAULT_FIN_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_LINGER: Duration = Duration::from_millis(200);

/// Sender settings.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub receiver_addr: SocketAddr,
    pub initial_window_size: u32,
    /// Payload bytes per chunk.
    pub chunk_size: usize,
    /// Retransmission timeout, per packet.
    pub timeout: Duration,
    /// Sleep between iterations of the send loop.
    pub pacing: Duration,
    /// Give up after this many retransmissions of one seq. `None` retries forever.
    pub max_retransmits: Option<u32>,
    /// FIN transmissions while waiting for its ack.
    pub fin_attempts: u32,
    /// Wait per FIN transmission. Must stay below the receiver's linger.
    pub fin_timeout: Duration,
    /// Where to listen for control commands. `None` disables the listener.
    pub control_addr: Option<SocketAddr>,
    /// Initial simulated loss probability.
    pub loss_chance: f64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            receiver_addr: (Ipv4Addr::LOCALHOST, DEFAULT_RECEIVER_PORT).into(),
            initial_window_size: DEFAULT_WINDOW_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_TIMEOUT,
            pacing: DEFAULT_PACING,
            max_retransmits: None,
            fin_attempts: DEFAULT_FIN_ATTEMPTS,
            fin_timeout: DEFAULT_FIN_TIMEOUT,
            control_addr: None,
            loss_chance: 0.0,
        }
    }
}

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen_addr: SocketAddr,
    /// Directory delivered files are written to.
    pub output_dir: PathBuf,
    /// How long to keep re-acking duplicate FINs. Every FIN restarts the
    /// period. Zero disables.
    pub linger: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            listen_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_RECEIVER_PORT).into(),
            output_dir: PathBuf::from("./received"),
            linger: DEFAULT_LINGER,
        }
    }
}
