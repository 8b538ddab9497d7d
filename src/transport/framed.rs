//! Length-framed, non-blocking TCP endpoint.
//!
//! # Example
//!
//! ```ignore
//! use framecheck::transport::{Connect, FramedSocket};
//!
//! let mut socket = FramedSocket::open(Role::Listen, "127.0.0.1", 0, 1500).await?;
//! while socket.establish().await? == Connect::NotYet {}
//! socket.send(Some(packet))?;
//! ```

use std::io::{self, ErrorKind};
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::config::Role;
use crate::error::{OracleError, Result};
use crate::protocol::{FrameBuffer, Packet, SendQueue};

/// Outcome of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connect {
    /// The peer is not there yet; try again later.
    NotYet,
    /// The connection is up.
    Established,
}

/// Outcome of one send step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The queue is drained; the next packet may be offered.
    Ready,
    /// Bytes remain queued; call `send(None)` once writable.
    NotReady,
}

/// Outcome of one receive step.
#[derive(Debug, PartialEq, Eq)]
pub enum Receive {
    /// Bytes were read; zero or more packets completed.
    Packets(Vec<Packet>),
    /// Nothing to read right now.
    WouldBlock,
    /// The peer closed its write side. Receive must not be called again.
    Eof,
}

#[derive(Debug)]
enum Endpoint {
    Listening(TcpListener),
    Connecting(SocketAddr),
    Established(TcpStream),
    /// Peer EOF observed; writing is still possible.
    HalfClosed(TcpStream),
    Closed,
}

/// The single framed TCP connection of a run.
#[derive(Debug)]
pub struct FramedSocket {
    endpoint: Endpoint,
    local_port: u16,
    queue: SendQueue,
    frames: FrameBuffer,
}

impl FramedSocket {
    /// Bind (listen) or prepare to connect.
    ///
    /// For `Listen`, port 0 lets the OS pick the port. For `Connect`, port 0
    /// reserves an ephemeral port through a throwaway bind and releases it,
    /// so the peer can be told where to listen.
    pub async fn open(role: Role, host: &str, port: u16, mtu: u32) -> Result<Self> {
        let (endpoint, local_port) = match role {
            Role::Listen => {
                let listener = TcpListener::bind((host, port)).await?;
                let port = listener.local_addr()?.port();
                tracing::info!(%host, port, "listening");
                (Endpoint::Listening(listener), port)
            }
            Role::Connect => {
                let port = if port == 0 {
                    TcpListener::bind((host, 0)).await?.local_addr()?.port()
                } else {
                    port
                };
                let addr = tokio::net::lookup_host((host, port))
                    .await?
                    .next()
                    .ok_or_else(|| OracleError::Resolve {
                        host: host.to_string(),
                        port,
                    })?;
                tracing::info!(%addr, "will connect");
                (Endpoint::Connecting(addr), port)
            }
        };

        Ok(Self {
            endpoint,
            local_port,
            queue: SendQueue::new(),
            frames: FrameBuffer::new(mtu),
        })
    }

    /// Port the peer has to use.
    pub fn port(&self) -> u16 {
        self.local_port
    }

    /// One attempt at establishing the connection.
    ///
    /// Refused and reset connects are not errors: they report
    /// [`Connect::NotYet`] and the caller retries. Once established, there is
    /// no reconnection.
    pub async fn establish(&mut self) -> Result<Connect> {
        let stream = match &self.endpoint {
            Endpoint::Listening(listener) => {
                let (stream, peer) = listener.accept().await?;
                tracing::info!(%peer, "accepted connection");
                stream
            }
            Endpoint::Connecting(addr) => match TcpStream::connect(*addr).await {
                Ok(stream) => {
                    tracing::info!(peer = %addr, "connected");
                    stream
                }
                Err(e) if is_transient_connect_error(&e) => {
                    tracing::trace!(error = %e, "connect not ready");
                    return Ok(Connect::NotYet);
                }
                Err(e) => return Err(e.into()),
            },
            _ => return Ok(Connect::Established),
        };
        stream.set_nodelay(true)?;
        self.endpoint = Endpoint::Established(stream);
        Ok(Connect::Established)
    }

    pub fn is_established(&self) -> bool {
        matches!(
            self.endpoint,
            Endpoint::Established(_) | Endpoint::HalfClosed(_)
        )
    }

    /// Whether the peer's EOF has been observed.
    pub fn peer_closed(&self) -> bool {
        matches!(self.endpoint, Endpoint::HalfClosed(_) | Endpoint::Closed)
    }

    fn stream(&self) -> Result<&TcpStream> {
        match &self.endpoint {
            Endpoint::Established(s) | Endpoint::HalfClosed(s) => Ok(s),
            _ => Err(OracleError::NotConnected),
        }
    }

    /// Wait until the socket is readable.
    pub async fn readable(&self) -> Result<()> {
        match &self.endpoint {
            Endpoint::Established(s) => Ok(s.readable().await?),
            _ => Err(OracleError::NotConnected),
        }
    }

    /// Wait until the socket is writable.
    pub async fn writable(&self) -> Result<()> {
        Ok(self.stream()?.writable().await?)
    }

    /// Queue `packet` (if any) and perform one non-blocking vectored write.
    ///
    /// The caller must not offer a new packet until [`SendStatus::Ready`]
    /// has been returned.
    ///
    /// # Errors
    ///
    /// [`OracleError::BrokenPipe`] if the peer no longer accepts data.
    pub fn send(&mut self, packet: Option<Packet>) -> Result<SendStatus> {
        if let Some(packet) = packet {
            debug_assert!(self.queue.is_empty(), "packet offered while not ready");
            self.queue.push(packet);
        }
        if self.queue.is_empty() {
            return Ok(SendStatus::Ready);
        }

        let written = match self.stream()?.try_write_vectored(&self.queue.slices()) {
            Ok(0) => return Err(OracleError::BrokenPipe),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(SendStatus::NotReady),
            Err(e) if is_broken_connection(&e) => return Err(OracleError::BrokenPipe),
            Err(e) => return Err(e.into()),
        };
        self.queue.advance(written);
        tracing::trace!(written, remaining = self.queue.remaining(), "sent");

        if self.queue.is_empty() {
            Ok(SendStatus::Ready)
        } else {
            Ok(SendStatus::NotReady)
        }
    }

    /// Perform one non-blocking read and return the packets it completed.
    ///
    /// # Errors
    ///
    /// [`OracleError::FrameTooLarge`] on a length prefix above the MTU,
    /// [`OracleError::ConnectionReset`] if the peer reset the connection.
    pub fn receive(&mut self) -> Result<Receive> {
        let Endpoint::Established(stream) = &self.endpoint else {
            return Err(OracleError::NotConnected);
        };

        match stream.try_read_buf(self.frames.read_target()) {
            Ok(0) => {
                if self.frames.has_partial_packet() {
                    tracing::warn!(
                        buffered = self.frames.len(),
                        "peer closed the connection in the middle of a frame"
                    );
                }
                self.endpoint = match std::mem::replace(&mut self.endpoint, Endpoint::Closed) {
                    Endpoint::Established(s) => Endpoint::HalfClosed(s),
                    other => other,
                };
                Ok(Receive::Eof)
            }
            Ok(n) => {
                tracing::trace!(read = n, "received");
                Ok(Receive::Packets(self.frames.extract()?))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Receive::WouldBlock),
            Err(e) if is_broken_connection(&e) => {
                self.endpoint = Endpoint::Closed;
                Err(OracleError::ConnectionReset)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the connection.
    pub fn close(&mut self) {
        self.endpoint = Endpoint::Closed;
    }
}

fn is_transient_connect_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
    )
}

fn is_broken_connection(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn receive_one(socket: &mut FramedSocket) -> Receive {
        loop {
            socket.readable().await.unwrap();
            match socket.receive().unwrap() {
                Receive::WouldBlock => continue,
                Receive::Packets(p) if p.is_empty() => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_listen_port_zero_gets_ephemeral_port() {
        let socket = FramedSocket::open(Role::Listen, "127.0.0.1", 0, 1500)
            .await
            .unwrap();
        assert_ne!(socket.port(), 0);
        assert!(!socket.is_established());
    }

    #[tokio::test]
    async fn test_connect_port_zero_reserves_a_port() {
        let socket = FramedSocket::open(Role::Connect, "127.0.0.1", 0, 1500)
            .await
            .unwrap();
        assert_ne!(socket.port(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused_is_not_yet() {
        let mut socket = FramedSocket::open(Role::Connect, "127.0.0.1", 0, 1500)
            .await
            .unwrap();
        assert_eq!(socket.establish().await.unwrap(), Connect::NotYet);
        assert!(matches!(socket.send(None), Err(OracleError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_and_receive_between_roles() {
        let mut server = FramedSocket::open(Role::Listen, "127.0.0.1", 0, 1500)
            .await
            .unwrap();
        let mut client = FramedSocket::open(Role::Connect, "127.0.0.1", server.port(), 1500)
            .await
            .unwrap();

        let (accepted, connected) = tokio::join!(server.establish(), client.establish());
        assert_eq!(accepted.unwrap(), Connect::Established);
        assert_eq!(connected.unwrap(), Connect::Established);

        client.writable().await.unwrap();
        assert_eq!(
            client.send(Some(Bytes::from_static(b"ping"))).unwrap(),
            SendStatus::Ready
        );
        assert_eq!(
            receive_one(&mut server).await,
            Receive::Packets(vec![Bytes::from_static(b"ping")])
        );

        client.close();
        assert_eq!(receive_one(&mut server).await, Receive::Eof);
        assert!(server.peer_closed());
        assert!(matches!(server.receive(), Err(OracleError::NotConnected)));
    }

    #[tokio::test]
    async fn test_receive_rejects_oversized_frame() {
        let mut server = FramedSocket::open(Role::Listen, "127.0.0.1", 0, 16)
            .await
            .unwrap();
        let mut raw = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        server.establish().await.unwrap();

        raw.write_all(&17u32.to_be_bytes()).await.unwrap();
        let err = loop {
            server.readable().await.unwrap();
            match server.receive() {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, OracleError::FrameTooLarge { length: 17, mtu: 16 }));
    }

    #[tokio::test]
    async fn test_large_packet_needs_several_writes() {
        let mut server = FramedSocket::open(Role::Listen, "127.0.0.1", 0, 8 << 20)
            .await
            .unwrap();
        let mut raw = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        server.establish().await.unwrap();

        let payload = Bytes::from(vec![0x5a; 4 << 20]);
        let reader = tokio::spawn(async move {
            let mut len = [0u8; 4];
            raw.read_exact(&mut len).await.unwrap();
            let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
            raw.read_exact(&mut body).await.unwrap();
            body
        });

        let mut status = server.send(Some(payload.clone())).unwrap();
        while status == SendStatus::NotReady {
            tokio::time::timeout(Duration::from_secs(5), server.writable())
                .await
                .unwrap()
                .unwrap();
            status = server.send(None).unwrap();
        }
        assert_eq!(reader.await.unwrap(), payload.to_vec());
    }
}
