//! Command-line arguments. Every option can also come from the environment
//! (or a `.env` file); flags win.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand};
use netviz_transfer::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONTROL_PORT, DEFAULT_RECEIVER_PORT, DEFAULT_WINDOW_SIZE,
};
use netviz_transfer::telemetry::DEFAULT_EVENT_PORT;
use netviz_transfer::{ReceiverConfig, SenderConfig};

/// NetViz - reliable file transfer over UDP with live protocol telemetry
#[derive(Parser, Debug)]
#[command(name = "netviz", version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub net: NetArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a file to a receiver
    Send {
        /// File to send
        path: PathBuf,
    },

    /// Receive one file and write it to the output directory
    Receive,

    /// Run a receiver and a sender in this process over loopback
    Demo {
        /// File to send
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct NetArgs {
    /// Receiver address the sender targets
    #[arg(long, global = true, env = "NETVIZ_RECEIVER_IP", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub receiver_ip: IpAddr,

    /// Receiver UDP port (also the port `receive` binds)
    #[arg(long, global = true, env = "NETVIZ_RECEIVER_PORT", default_value_t = DEFAULT_RECEIVER_PORT)]
    pub receiver_port: u16,

    /// Initial sliding-window size in packets
    #[arg(long, global = true, env = "NETVIZ_WINDOW_SIZE", default_value_t = DEFAULT_WINDOW_SIZE)]
    pub window_size: u32,

    /// Payload bytes per chunk
    #[arg(long, global = true, env = "NETVIZ_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Retransmission timeout in milliseconds
    #[arg(long, global = true, env = "NETVIZ_TIMEOUT_MS", default_value_t = 1000)]
    pub timeout_ms: u64,

    /// Local port of the telemetry sidecar
    #[arg(long, global = true, env = "NETVIZ_EVENT_PORT", default_value_t = DEFAULT_EVENT_PORT)]
    pub event_port: u16,

    /// Local port for SET_WINDOW / SET_LOSS control messages
    #[arg(long, global = true, env = "NETVIZ_CONTROL_PORT", default_value_t = DEFAULT_CONTROL_PORT)]
    pub control_port: u16,

    /// Where received files are written
    #[arg(long, global = true, env = "NETVIZ_OUTPUT_DIR", default_value = "./received")]
    pub output_dir: PathBuf,

    /// Abort when one packet has been retransmitted this many times
    #[arg(long, global = true, env = "NETVIZ_MAX_RETRANSMITS")]
    pub max_retransmits: Option<u32>,

    /// Sleep between send-loop iterations in milliseconds
    #[arg(long, global = true, env = "NETVIZ_PACING_MS", default_value_t = 5)]
    pub pacing_ms: u64,

    /// Do not send telemetry events to the sidecar
    #[arg(long, global = true, env = "NETVIZ_NO_EVENTS", value_parser = FalseyValueParser::new())]
    pub no_events: bool,

    /// Do not listen for control messages
    #[arg(long, global = true, env = "NETVIZ_NO_CONTROL", value_parser = FalseyValueParser::new())]
    pub no_control: bool,
}

impl NetArgs {
    pub fn receiver_addr(&self) -> SocketAddr {
        SocketAddr::new(self.receiver_ip, self.receiver_port)
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            receiver_addr: self.receiver_addr(),
            initial_window_size: self.window_size,
            chunk_size: self.chunk_size,
            timeout: Duration::from_millis(self.timeout_ms),
            pacing: Duration::from_millis(self.pacing_ms),
            max_retransmits: self.max_retransmits,
            control_addr: (!self.no_control).then(|| (Ipv4Addr::LOCALHOST, self.control_port).into()),
            ..SenderConfig::default()
        }
    }

    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            listen_addr: (Ipv4Addr::UNSPECIFIED, self.receiver_port).into(),
            output_dir: self.output_dir.clone(),
            ..ReceiverConfig::default()
        }
    }
}
