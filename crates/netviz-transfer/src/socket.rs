use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// OS socket buffer size requested for transfer sockets (4 MB).
pub const SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// Read timeout on every blocking receive, so loops can observe their stop flags.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bind a blocking UDP socket with enlarged buffers and a [`POLL_INTERVAL`] read timeout.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    // Buffer sizes are best-effort; the kernel may cap them
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER);
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER);
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Prepare a caller-supplied socket the same way [`bind_udp`] does.
pub fn configure(socket: &UdpSocket) -> io::Result<()> {
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(POLL_INTERVAL))
}

/// Ephemeral wildcard address in the same family as `peer`.
pub fn ephemeral_for(peer: SocketAddr) -> SocketAddr {
    if peer.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    }
}

/// The read timeout expired. Unix reports `WouldBlock`, Windows `TimedOut`.
pub fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Errors a single datagram operation can hit without the socket being unusable,
/// e.g. an ICMP port-unreachable surfacing on the next receive.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
