mod cli;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::info;

use netviz_transfer::{
    EventSink, FanoutSink, ReceiveResult, Receiver, SendResult, Sender, TracingSink, UdpEventSink,
};

use crate::cli::{Cli, Commands, NetArgs};

fn main() -> anyhow::Result<()> {
    // .env first so clap sees its values through the env bindings
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netviz=info,netviz_transfer=info".into()),
        )
        .init();

    let events = event_sink(&cli.net)?;
    match &cli.command {
        Commands::Send { path } => {
            let result = send(&cli.net, path, events)?;
            print_sent(&result);
        }
        Commands::Receive => {
            let receiver = Receiver::bind(cli.net.receiver_config(), events)
                .context("failed to start receiver")?;
            let result = receiver.run().context("receive failed")?;
            print_received(&result);
        }
        Commands::Demo { path } => demo(&cli.net, path, events)?,
    }
    Ok(())
}

/// UDP telemetry plus debug logging, or logging alone with `--no-events`.
fn event_sink(net: &NetArgs) -> anyhow::Result<Arc<dyn EventSink>> {
    if net.no_events {
        return Ok(Arc::new(TracingSink));
    }
    let udp = UdpEventSink::localhost(net.event_port).context("failed to open telemetry socket")?;
    info!("Telemetry events go to {}", udp.target());
    Ok(Arc::new(FanoutSink::new(vec![Arc::new(udp), Arc::new(TracingSink)])))
}

fn send(net: &NetArgs, path: &Path, events: Arc<dyn EventSink>) -> anyhow::Result<SendResult> {
    let sender = Sender::bind(net.sender_config(), events).context("failed to start sender")?;
    if let Some(addr) = sender.control_addr() {
        info!("Accepting window/loss control messages on {}", addr);
    }
    sender
        .send_file(path)
        .with_context(|| format!("failed to send {}", path.display()))
}

/// Receiver on an ephemeral loopback port and a sender aimed at it.
fn demo(net: &NetArgs, path: &Path, events: Arc<dyn EventSink>) -> anyhow::Result<()> {
    let mut config = net.receiver_config();
    config.listen_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let receiver = Receiver::bind(config, events.clone()).context("failed to start demo receiver")?;
    let receiver_addr = receiver.local_addr()?;
    let receiver_thread = thread::Builder::new()
        .name("netviz-receiver".into())
        .spawn(move || receiver.run())?;

    let mut sender_config = net.sender_config();
    sender_config.receiver_addr = receiver_addr;
    let sender = Sender::bind(sender_config, events).context("failed to start demo sender")?;
    let sent = sender
        .send_file(path)
        .with_context(|| format!("failed to send {}", path.display()))?;

    let received = receiver_thread
        .join()
        .map_err(|_| anyhow!("receiver thread panicked"))?
        .context("demo receive failed")?;

    print_sent(&sent);
    print_received(&received);
    if received.sha256 != sent.sha256 {
        anyhow::bail!("checksum mismatch: sent {}, received {}", sent.sha256, received.sha256);
    }
    Ok(())
}

fn print_sent(result: &SendResult) {
    println!(
        "sent {} ({} bytes, {} packets, {} retransmits) in {:.2?}{}",
        result.file_name,
        result.total_bytes,
        result.total_packets,
        result.retransmits,
        result.elapsed,
        if result.fin_acked { "" } else { ", FIN unacknowledged" },
    );
    println!("  sha256 {}", result.sha256);
}

fn print_received(result: &ReceiveResult) {
    match &result.path {
        Some(path) => println!(
            "received {} bytes into {}{}",
            result.bytes,
            path.display(),
            if result.complete { "" } else { " (incomplete)" },
        ),
        None => println!("received {} bytes but no file name; nothing written", result.bytes),
    }
    println!("  sha256 {}", result.sha256);
}
