//! Transport sockets
//!
//! One datagram-sized send at a time over TCP or UDP. TCP sets `TCP_NODELAY`
//! and loops over partial writes under a hard per-datagram deadline; UDP is
//! a single send. IO errors are classified into transient failures, a
//! timeout, or a lost connection — the sender treats the last kind as a
//! reason to tear the link down immediately.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use crate::config::Transport;
use crate::error::NetworkError;

/// How long a TCP connect may take before bring-up counts as failed
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected transport towards the server
pub enum TransportSocket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Resolve `host:port`, preferring the first address returned
pub fn resolve(server: &str) -> Result<SocketAddr, NetworkError> {
    server
        .to_socket_addrs()
        .map_err(|e| NetworkError::AddressResolution(format!("{server}: {e}")))?
        .next()
        .ok_or_else(|| NetworkError::AddressResolution(server.to_string()))
}

impl TransportSocket {
    /// Connect to `server` over the given transport
    pub fn connect(transport: Transport, server: &str) -> Result<Self, NetworkError> {
        let addr = resolve(server)?;
        match transport {
            Transport::Tcp => {
                let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
                    .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
                stream
                    .set_nodelay(true)
                    .map_err(|e| NetworkError::ConnectionFailed(format!("nodelay: {e}")))?;
                Ok(TransportSocket::Tcp(stream))
            }
            Transport::Udp => {
                let socket = UdpSocket::bind(("0.0.0.0", 0))
                    .map_err(|e| NetworkError::ConnectionFailed(format!("bind: {e}")))?;
                socket
                    .connect(addr)
                    .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
                Ok(TransportSocket::Udp(socket))
            }
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            TransportSocket::Tcp(_) => Transport::Tcp,
            TransportSocket::Udp(_) => Transport::Udp,
        }
    }

    /// Send one whole datagram, or say why not.
    ///
    /// `deadline` bounds the TCP partial-write loop; it is not used for UDP,
    /// where the datagram either leaves in one call or not at all.
    pub fn send_datagram(
        &mut self,
        datagram: &[u8],
        deadline: Duration,
    ) -> Result<(), NetworkError> {
        match self {
            TransportSocket::Udp(socket) => {
                let sent = socket.send(datagram).map_err(classify)?;
                if sent != datagram.len() {
                    return Err(NetworkError::ShortSend {
                        sent,
                        expected: datagram.len(),
                    });
                }
                Ok(())
            }
            TransportSocket::Tcp(stream) => {
                let start = Instant::now();
                let mut written = 0usize;
                while written < datagram.len() {
                    let remaining = deadline.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(NetworkError::Timeout);
                    }
                    stream
                        .set_write_timeout(Some(remaining))
                        .map_err(classify)?;
                    match stream.write(&datagram[written..]) {
                        Ok(0) => {
                            return Err(NetworkError::ConnectionLost(
                                "peer closed the stream".into(),
                            ))
                        }
                        Ok(n) => written += n,
                        Err(e) if is_timeout(&e) => {
                            // Deadline check at the top of the loop decides
                            // whether to keep going
                        }
                        Err(e) => return Err(classify(e)),
                    }
                }
                Ok(())
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Map an IO error onto the sender's failure taxonomy
fn classify(e: io::Error) -> NetworkError {
    match e.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => NetworkError::ConnectionLost(e.to_string()),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => NetworkError::Timeout,
        _ => NetworkError::SendFailed(e.to_string()),
    }
}
