use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, UdpSocket};

/// Bind a game listener on the first free port of the configured range.
///
/// Returns the listener and the chosen port.
pub async fn bind_game_port(
    bind_addr: IpAddr,
    start: u16,
    end: u16,
) -> io::Result<(TcpListener, u16)> {
    let mut last_err = io::Error::new(io::ErrorKind::AddrInUse, "empty port range");
    for port in start..=end {
        match TcpListener::bind(SocketAddr::new(bind_addr, port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

/// Bind the UDP discovery socket with broadcast enabled.
pub async fn bind_discovery(bind_addr: IpAddr, port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::new(bind_addr, port)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
