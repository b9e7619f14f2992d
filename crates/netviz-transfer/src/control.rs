//! Control intake: runtime knobs pushed from the visualizer UI.
//!
//! A dedicated UDP listener accepts `SET_WINDOW` and `SET_LOSS` commands and
//! applies them to the running sender. Anything it cannot parse is ignored.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use netviz_types::ControlCommand;
use rand::Rng;
use tracing::{debug, error, info};

use crate::error::TransferError;
use crate::socket;
use crate::window::WindowManager;

/// Coin-flip drop of outgoing packets, for demonstrating recovery.
pub struct LossSimulator {
    /// `f64` bits of the drop probability.
    chance: AtomicU64,
}

impl LossSimulator {
    pub fn new(chance: f64) -> Self {
        let sim = Self {
            chance: AtomicU64::new(0f64.to_bits()),
        };
        sim.set_chance(chance);
        sim
    }

    /// Set the drop probability, clamped to `[0, 1]`. NaN disables loss.
    pub fn set_chance(&self, chance: f64) {
        let chance = if chance.is_nan() { 0.0 } else { chance.clamp(0.0, 1.0) };
        self.chance.store(chance.to_bits(), Ordering::Relaxed);
    }

    pub fn chance(&self) -> f64 {
        f64::from_bits(self.chance.load(Ordering::Relaxed))
    }

    pub fn should_drop(&self) -> bool {
        let chance = self.chance();
        chance > 0.0 && rand::rng().random_bool(chance)
    }
}

impl Default for LossSimulator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Apply one command to the sender's shared state.
pub fn apply_command(command: &ControlCommand, window: &WindowManager, loss: &LossSimulator) {
    match *command {
        ControlCommand::SetWindow { size } => {
            info!("Window size set to {} by control message", size);
            window.set_window_size(size);
        }
        ControlCommand::SetLoss { chance } => {
            loss.set_chance(chance);
            info!("Simulated loss set to {:.1}%", loss.chance() * 100.0);
        }
    }
}

/// Bound control socket, not yet running.
pub struct ControlListener {
    socket: UdpSocket,
}

impl ControlListener {
    pub fn bind(addr: SocketAddr) -> Result<Self, TransferError> {
        let socket = socket::bind_udp(addr).map_err(|source| TransferError::Bind { addr, source })?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the listener on its own thread until `running` is cleared.
    pub fn spawn(
        self,
        window: Arc<WindowManager>,
        loss: Arc<LossSimulator>,
        running: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("netviz-control".into())
            .spawn(move || self.run(&window, &loss, &running))
    }

    fn run(&self, window: &WindowManager, loss: &LossSimulator, running: &AtomicBool) {
        if let Ok(addr) = self.socket.local_addr() {
            info!("Control listener on {}", addr);
        }
        let mut buf = [0u8; 1024];
        while running.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    match ControlCommand::parse(&text) {
                        Some(command) => apply_command(&command, window, loss),
                        None => debug!(%from, "ignoring control message: {}", text),
                    }
                }
                Err(ref e) if socket::is_poll_timeout(e) || socket::is_transient(e) => continue,
                Err(e) => {
                    error!("Control listener stopped: {}", e);
                    break;
                }
            }
        }
    }
}
